use super::types::RetryConfig;
use backoff::backoff::Backoff;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff without randomization: base, 2×base, 4×base, ...
#[derive(Debug, Clone)]
pub struct DoublingBackoff {
    base: Duration,
    current: Duration,
}

impl DoublingBackoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            current: base,
        }
    }
}

impl Backoff for DoublingBackoff {
    fn reset(&mut self) {
        self.current = self.base;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let wait = self.current;
        self.current = self.current.saturating_mul(2);
        Some(wait)
    }
}

/// Retry executor with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `f(attempt)` (attempt is 0-based) until it succeeds, returns an
    /// error rejected by `should_retry`, or the retry budget is spent.
    pub async fn execute_with_predicate<F, Fut, T, E, P>(
        &self,
        mut f: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut backoff = self.create_backoff();
        let mut attempt = 0;

        loop {
            match f(attempt).await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "Request succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !should_retry(&e) {
                        debug!(attempts = attempt + 1, error = %e, "Error not retryable");
                        return Err(e);
                    }

                    if attempt >= self.config.max_retries {
                        warn!(
                            attempts = attempt + 1,
                            max_retries = self.config.max_retries,
                            error = %e,
                            "Request failed after max retries"
                        );
                        return Err(e);
                    }

                    let Some(wait) = backoff.next_backoff() else {
                        warn!(attempts = attempt + 1, error = %e, "Backoff exhausted");
                        return Err(e);
                    };

                    debug!(
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Scheduling retry"
                    );
                    attempt += 1;
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn create_backoff(&self) -> DoublingBackoff {
        DoublingBackoff::new(self.config.base_backoff())
    }
}
