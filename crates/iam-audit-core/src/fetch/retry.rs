//! Bounded exponential backoff for Identity API calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// How often and how patiently a failed call is repeated.
///
/// Only [`FetchError::is_retryable`] errors are repeated. The delay doubles
/// after every attempt, starting at `initial_backoff` and never exceeding
/// `max_backoff`; a server `Retry-After` hint replaces the computed delay but
/// is capped the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// The last error of a call together with how many attempts were made.
#[derive(Debug, Clone)]
pub struct RetryError {
    pub error: FetchError,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_backoff);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently or runs out of attempts.
    ///
    /// `on_retry` is called with the attempt number, the upcoming delay and
    /// the error before every sleep.
    pub async fn run<T, F, Fut>(
        &self,
        mut op: F,
        mut on_retry: impl FnMut(u32, Duration, &FetchError),
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempts < max_attempts => {
                    let hint = match &error {
                        FetchError::Transient { retry_after, .. } => *retry_after,
                        _ => None,
                    };
                    let delay = self.delay_for(attempts, hint);
                    on_retry(attempts, delay, &error);
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(RetryError { error, attempts }),
            }
        }
    }
}
