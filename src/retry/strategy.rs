// src/retry/strategy.rs

use crate::config::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

/// Final result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryStrategy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Run `f` until it succeeds or the attempt budget is spent.
    pub async fn execute<F, Fut, T, E>(&self, mut f: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match f(attempt).await {
                Ok(result) => {
                    return RetryOutcome {
                        result: Ok(result),
                        attempts: attempt,
                    }
                }
                Err(error) => {
                    if attempt >= max_attempts {
                        debug!("Giving up after {} attempts: {}", attempt, error);
                        return RetryOutcome {
                            result: Err(error),
                            attempts: attempt,
                        };
                    }

                    let backoff = self.calculate_backoff(attempt);
                    debug!(
                        "Attempt {} failed: {}. Retrying in {:?}",
                        attempt, error, backoff
                    );

                    if !backoff.is_zero() {
                        sleep(backoff).await;
                    }
                }
            }
        }
    }

    /// Exponential backoff with up to 25% jitter. Zero base means no pause.
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base().as_millis() as u64;
        if base == 0 {
            return Duration::ZERO;
        }
        let max = self.config.backoff_max().as_millis() as u64;

        let exponential = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(max);
        let jitter = (capped as f64 * rand::random::<f64>() * 0.25) as u64;

        Duration::from_millis(capped + jitter)
    }
}
