// ============================================================================
// KIN-SDK - Retry
// ============================================================================
// Exponential backoff for idempotent Horizon reads.
//
// Transaction submission never goes through here: a resent envelope could
// be applied twice or collide with its own sequence number.
// ============================================================================

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::HorizonOptions;
use crate::error::GatewayError;

/// Upper bound for a single backoff sleep
const MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self { retries, base_delay }
    }

    pub fn from_options(options: &HorizonOptions) -> Self {
        Self::new(options.num_retries, options.backoff_factor)
    }

    /// Delay before `attempt` (0 is the first try): base * 2^(attempt-1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt - 1);
        std::cmp::min(self.base_delay.saturating_mul(multiplier), MAX_DELAY)
    }

    /// Run `operation` until it succeeds, fails for good, or retries run out
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            let delay = self.delay_for_attempt(attempt);
            if !delay.is_zero() {
                debug!(attempt, ?delay, "Retrying after delay");
                sleep(delay).await;
            }

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    warn!(
                        attempt = attempt + 1,
                        retries = self.retries,
                        error = %e,
                        "Retryable error, will retry"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_options(&HorizonOptions::default())
    }
}
