//! Checkout validation gate

use std::time::Duration;

use tidepool_core::Connection;

/// Check whether `conn` is still usable, waiting at most `timeout`.
///
/// Never fails: a probe that errors or runs past `timeout` is logged and the
/// connection is reported as invalid.
pub async fn is_valid(conn: &dyn Connection, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, conn.is_valid(timeout)).await {
        Ok(Ok(valid)) => valid,
        Ok(Err(e)) => {
            tracing::debug!(
                driver = conn.driver_name(),
                error = %e,
                "error validating connection"
            );
            false
        }
        Err(_) => {
            tracing::debug!(
                driver = conn.driver_name(),
                timeout_ms = timeout.as_millis() as u64,
                "connection validation timed out"
            );
            false
        }
    }
}
