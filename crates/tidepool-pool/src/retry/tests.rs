//! Tests for the retry module

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tidepool_core::PoolError;
use tokio::time::Instant;

#[test]
fn test_policy_accessors() {
    let policy = RetryPolicy::new(4, Duration::from_millis(250));
    assert_eq!(policy.attempts(), 4);
    assert_eq!(policy.delay(), Duration::from_millis(250));
    assert_eq!(policy.worst_case_delay(), Duration::from_millis(750));
}

#[test]
fn test_policy_makes_at_least_one_attempt() {
    let policy = RetryPolicy::new(0, Duration::from_millis(10));
    assert_eq!(policy.attempts(), 1);
    assert_eq!(policy.worst_case_delay(), Duration::ZERO);
}

#[test]
fn test_policy_default() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.attempts(), 10);
    assert_eq!(policy.delay(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_retry_returns_first_success() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new(5, Duration::from_secs(1));

    let started = Instant::now();
    let value = policy
        .retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, PoolError>(42)
        })
        .await
        .expect("retry");

    assert_eq!(value, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_after_failures() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new(5, Duration::from_secs(1));

    let started = Instant::now();
    let value = policy
        .retry(|| async {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            if call < 2 {
                Err(PoolError::Connection("refused".into()))
            } else {
                Ok(call)
            }
        })
        .await
        .expect("retry");

    assert_eq!(value, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Two pauses of one second each
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_all_attempts() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new(3, Duration::from_millis(100));

    let result: tidepool_core::Result<()> = policy
        .retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PoolError::Connection("refused".into()))
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match result {
        Err(PoolError::RetryExhausted { attempts, source }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, PoolError::Connection(_)));
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_attempt_does_not_sleep() {
    let policy = RetryPolicy::new(1, Duration::from_secs(60));

    let started = Instant::now();
    let result: tidepool_core::Result<()> = policy
        .retry(|| async { Err(PoolError::Timeout("connect".into())) })
        .await;

    assert!(result.is_err());
    assert_eq!(started.elapsed(), Duration::ZERO);
}
