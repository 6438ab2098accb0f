// Retry Executor
// Re-invokes control-plane calls that fail with a transient error

use std::future::Future;
use std::time::Duration;

use crate::models::RetryPolicy;
use crate::services::ServiceError;

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based): base * multiplier^(attempt - 2)
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let factor = u64::from(self.backoff_multiplier).saturating_pow(attempt - 2);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Execute an async operation, retrying transient failures with exponential backoff.
///
/// Non-transient failures are returned after the first attempt. When every
/// attempt fails the last error is returned.
pub async fn execute_with_retry<T, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                attempt += 1;
                let delay = policy.delay_before_attempt(attempt);
                log::warn!(
                    "[Retry] {} failed with {} (attempt {}/{}), retrying in {}ms",
                    operation_name,
                    err.code,
                    attempt - 1,
                    max_attempts,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if err.is_transient() {
                    log::error!(
                        "[Retry] {} failed after {} attempts: {}",
                        operation_name,
                        attempt,
                        err
                    );
                }
                return Err(err);
            }
        }
    }
}
