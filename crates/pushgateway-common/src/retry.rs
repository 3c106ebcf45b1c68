//! Bounded retry with a fixed delay between attempts.
//!
//! Used by the Job re-creation loop, where the wait is tied to how long a
//! background delete takes rather than to server load.

use std::time::Duration;

use tracing::{error, warn};

/// Retry policy.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts including the first
    pub max_attempts: u32,
    /// Wait between attempts
    pub delay: Duration,
}

impl RetryConfig {
    /// `attempts` tries, `delay` apart
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts.max(1),
            delay,
        }
    }
}

/// Retry `operation` while `should_retry` accepts the error.
///
/// An error the predicate rejects is returned immediately. When attempts run
/// out the last error is returned.
pub async fn retry_while<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = config.delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(config.delay).await;
            }
        }
    }
}
