//! Checkout throughput benchmarks
//!
//! Measures acquire/release round trips on a 10-connection pool with 5, 10
//! and 15 concurrent workers, with and without validation on checkout.
//!
//! Run with: cargo bench -p tidepool-pool --bench checkout

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tidepool_core::{
    Connection, ConnectionFactory, PoolError, QueryResult, Result, StatementResult, Transaction,
    Value,
};
use tidepool_pool::{ConnectionPool, PoolConfig};
use tokio::runtime::Runtime;

const POOL_SIZE: usize = 10;
const CHECKOUTS_PER_WORKER: usize = 100;

struct NoopConnection {
    closed: AtomicBool,
}

#[async_trait]
impl Connection for NoopConnection {
    fn driver_name(&self) -> &str {
        "noop"
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
        Ok(StatementResult::command(0))
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
        Ok(QueryResult::empty())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        Err(PoolError::NotSupported("noop".into()))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct NoopFactory;

#[async_trait]
impl ConnectionFactory for NoopFactory {
    async fn create(&self, _connection_string: &str) -> Result<Arc<dyn Connection>> {
        Ok(Arc::new(NoopConnection {
            closed: AtomicBool::new(false),
        }))
    }
}

fn start_pool(rt: &Runtime, validate: bool) -> Arc<ConnectionPool> {
    let config = PoolConfig::new(POOL_SIZE)
        .with_client_timeout(Duration::from_secs(5))
        .with_validate_on_checkout(validate);
    let pool = Arc::new(ConnectionPool::with_config(
        "noop://bench",
        NoopFactory,
        config,
    ));

    rt.block_on(async {
        pool.start().expect("start pool");
        while pool.stats().idle() < POOL_SIZE {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });
    pool
}

async fn run_workers(pool: Arc<ConnectionPool>, workers: usize) {
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                for _ in 0..CHECKOUTS_PER_WORKER {
                    let conn = pool.get_connection().await.expect("checkout");
                    black_box(conn.id());
                    conn.close().await.expect("release");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("worker");
    }
}

fn bench_checkout(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");

    for validate in [false, true] {
        let pool = start_pool(&rt, validate);
        let name = if validate {
            "checkout_validated"
        } else {
            "checkout"
        };
        let mut group = c.benchmark_group(name);

        for workers in [5usize, 10, 15] {
            group.bench_with_input(
                BenchmarkId::from_parameter(workers),
                &workers,
                |b, &workers| {
                    b.to_async(&rt)
                        .iter(|| run_workers(Arc::clone(&pool), workers));
                },
            );
        }

        group.finish();
        rt.block_on(pool.stop());
    }
}

criterion_group!(benches, bench_checkout);
criterion_main!(benches);
