//! Retry for chat transport calls that hit the rate limit.
//!
//! Only [`TransportError::RetryAfter`] is retried, and always with the wait
//! the transport asked for. Any other failure is returned to the caller on
//! the first occurrence.

use std::future::Future;
use std::time::Duration;

use crate::core::config::PipelineSettings;
use crate::core::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Added on top of the signaled wait.
    pub margin: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            margin: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            max_retries: settings.rate_limit_retries,
            margin: settings.retry_margin(),
        }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Runs `call`, sleeping and repeating it while the transport answers with
/// `RetryAfter`, up to `policy.max_retries` times.
///
/// When retries run out the last `RetryAfter` is returned.
pub async fn retry_on_rate_limit<T, F, Fut>(policy: RetryPolicy, operation: &str, mut call: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut retries = 0u32;
    loop {
        match call().await {
            Err(TransportError::RetryAfter(wait)) if retries < policy.max_retries => {
                retries += 1;
                let delay = wait + policy.margin;
                log::warn!(
                    "{} rate limited, retrying in {:?} ({}/{})",
                    operation,
                    delay,
                    retries,
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
