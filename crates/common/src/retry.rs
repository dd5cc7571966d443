use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(700),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }
}

/// Retry a single external call with linear backoff (base × attempt
/// number). Only transient failures are retried; structural failures and
/// the final attempt's error surface to the caller. Returns the value and
/// the number of attempts it took.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
) -> PipelineResult<(T, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok((value, attempt)),
            Err(err) if attempt < policy.attempts && err.is_transient() => {
                debug!("transient failure on attempt {}: {}", attempt, err);
                tokio::time::sleep(policy.base_delay * attempt).await;
            }
            Err(err) => return Err(err),
        }
    }
}
