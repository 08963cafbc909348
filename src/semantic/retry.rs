//! Exponential backoff for transient embedding failures.

use std::time::Duration;

use crate::semantic::embeddings::EmbeddingError;

const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, EmbeddingError>
    where
        F: FnMut() -> Result<T, EmbeddingError>,
    {
        let attempts = self.max_attempts.max(1);

        for attempt in 1..=attempts {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        log::debug!("{what} succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() => {
                    if attempt == attempts {
                        log::error!("{what} failed after {attempts} attempts: {err}");
                        return Err(EmbeddingError::RetriesExhausted {
                            attempts,
                            last: err.to_string(),
                        });
                    }
                    let delay = self.delay_for(attempt);
                    log::warn!("{what} failed ({err}), attempt {attempt}/{attempts}, retrying in {delay:?}");
                    std::thread::sleep(delay);
                }
                Err(err) => {
                    log::warn!("{what} failed with non-retryable error: {err}");
                    return Err(err);
                }
            }
        }

        unreachable!("retry loop always returns")
    }
}
