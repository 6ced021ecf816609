//! Bounded exponential backoff for oracle calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::OracleError;

/// How often and how patiently a failed oracle call is retried.
///
/// Only [retryable](OracleError::is_retryable) failures are retried. The
/// delay doubles after every attempt and never exceeds `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "millis", rename = "initial_backoff_ms")]
    pub initial_backoff: Duration,
    #[serde(with = "millis", rename = "max_backoff_ms")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Worst-case time for [`run`](Self::run) when each attempt may take
    /// `attempt`: every attempt plus the delays between them.
    pub fn budget(&self, attempt: Duration) -> Duration {
        (0..self.max_retries).fold(attempt, |total, retry| {
            total.saturating_add(attempt).saturating_add(self.backoff(retry))
        })
    }

    /// Run `call` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, mut call: F) -> Result<T, OracleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let mut retry = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && retry < self.max_retries => {
                    let delay = self.backoff(retry);
                    tracing::warn!(
                        error = %err,
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying fix oracle call"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
