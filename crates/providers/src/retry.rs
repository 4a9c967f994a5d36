//! Exponential back-off for transient provider failures.
//!
//! Retries only happen before the first fragment of a response has been
//! handed to the caller; once output is flowing an error is surfaced as-is.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use tokio_util::sync::CancellationToken;
use sc_domain::capability::LlmCapabilities;
use sc_domain::config::RetryConfig;
use sc_domain::error::{Error, Result};
use sc_domain::stream::{BoxStream, Fragment};

use crate::traits::{ChatRequest, LlmProvider};

/// HTTP statuses worth another attempt.
const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Message fragments that mark a transient failure (matched lowercase).
const RETRYABLE_MESSAGES: [&str; 8] = [
    "overloaded",
    "rate limit",
    "premature close",
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "network",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            multiplier: cfg.backoff_multiplier,
            jitter: cfg.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    ///
    /// `initial · multiplier^attempt`, capped at `max_delay`, then scaled by
    /// a random factor in [0.5, 1.0] when jitter is on. A provider-supplied
    /// `retry_after` replaces the computed delay but is still capped.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_delay);
        }
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);
        let scaled_ms = if self.jitter {
            capped_ms * (0.5 + 0.5 * random_fraction())
        } else {
            capped_ms
        };
        Duration::from_millis(scaled_ms.max(0.0) as u64)
    }
}

/// Uniform-ish fraction in [0, 1] from a v4 UUID's random bits.
fn random_fraction() -> f64 {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    let n = u16::from_le_bytes([bytes[0], bytes[1]]);
    n as f64 / u16::MAX as f64
}

/// Whether an error is transient.
pub fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Provider {
            status, message, ..
        } => {
            if let Some(code) = status {
                if RETRYABLE_STATUSES.contains(code) {
                    return true;
                }
            }
            message_is_transient(message)
        }
        Error::Timeout(_) => true,
        Error::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::BrokenPipe
        ),
        Error::Other(message) => message_is_transient(message),
        _ => false,
    }
}

fn message_is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_MESSAGES.iter().any(|m| lower.contains(m))
}

fn retry_after(err: &Error) -> Option<Duration> {
    match err {
        Error::Provider { retry_after, .. } => *retry_after,
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RetryingProvider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wraps a provider and retries transient failures that happen before the
/// first fragment arrives.
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait::async_trait]
impl LlmProvider for RetryingProvider {
    async fn stream_completion(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<Fragment>>> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let err = match self.inner.stream_completion(req.clone(), cancel.clone()).await {
                Ok(mut stream) => match stream.next().await {
                    Some(Err(e)) => e,
                    Some(Ok(first)) => {
                        return Ok(Box::pin(async_stream::stream! {
                            yield Ok(first);
                            while let Some(item) = stream.next().await {
                                yield item;
                            }
                        }));
                    }
                    None => return Ok(Box::pin(futures_util::stream::empty())),
                },
                Err(e) => e,
            };

            if attempt >= self.policy.max_retries || !is_retryable(&err) {
                if attempt > 0 {
                    tracing::warn!(
                        provider = %self.inner.provider_id(),
                        attempts = attempt + 1,
                        error = %err,
                        "provider request failed after retries"
                    );
                }
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt, retry_after(&err));
            tracing::warn!(
                provider = %self.inner.provider_id(),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient provider error, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
            attempt += 1;
        }
    }

    fn capabilities(&self) -> &LlmCapabilities {
        self.inner.capabilities()
    }

    fn provider_id(&self) -> &str {
        self.inner.provider_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter,
        }
    }

    fn status_err(status: u16) -> Error {
        Error::Provider {
            provider: "p".into(),
            message: "boom".into(),
            status: Some(status),
            retry_after: None,
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let p = policy(false);
        assert_eq!(p.delay_for(0, None), Duration::from_millis(100));
        assert_eq!(p.delay_for(1, None), Duration::from_millis(200));
        assert_eq!(p.delay_for(2, None), Duration::from_millis(400));
        assert_eq!(p.delay_for(10, None), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_half_to_full() {
        let p = policy(true);
        for _ in 0..50 {
            let d = p.delay_for(2, None);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(400), "{d:?}");
        }
    }

    #[test]
    fn retry_after_overrides_but_is_capped() {
        let p = policy(true);
        assert_eq!(
            p.delay_for(0, Some(Duration::from_millis(700))),
            Duration::from_millis(700)
        );
        assert_eq!(
            p.delay_for(0, Some(Duration::from_secs(60))),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn classifies_retryable_errors() {
        for code in RETRYABLE_STATUSES {
            assert!(is_retryable(&status_err(code)), "{code}");
        }
        assert!(!is_retryable(&status_err(400)));
        assert!(!is_retryable(&status_err(401)));
        assert!(is_retryable(&Error::provider("p", "Model is Overloaded")));
        assert!(is_retryable(&Error::provider("p", "rate limit exceeded")));
        assert!(is_retryable(&Error::provider("p", "premature close")));
        assert!(is_retryable(&Error::Timeout("read".into())));
        assert!(!is_retryable(&Error::provider("p", "invalid request")));
        assert!(!is_retryable(&Error::Cancelled));
        assert!(!is_retryable(&Error::Config("bad".into())));
    }

    #[test]
    fn policy_from_config() {
        let p = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.initial_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(30));
    }
}
