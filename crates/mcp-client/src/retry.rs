//! Retry strategies and the executor that applies them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use tether_domain::config::RetryConfig;

use crate::error::McpError;

/// Decides whether and when a failed attempt is retried.
///
/// `attempt` is the 0-based index of the attempt that just failed.
pub trait RetryStrategy: Send + Sync + fmt::Debug {
    /// Retries allowed after the first try.
    fn max_attempts(&self) -> u32;

    fn should_retry(&self, error: &McpError, attempt: u32) -> bool {
        error.is_recoverable() && attempt < self.max_attempts()
    }

    fn delay(&self, attempt: u32) -> Duration;
}

/// `min(base * 2^attempt, max)`; jitter scales it into `[50%, 100%]`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5_000),
            max_attempts: 3,
            jitter: true,
        }
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let capped = 1u32
            .checked_shl(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
            capped.mul_f64(factor).min(self.max_delay)
        } else {
            capped
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixedDelay {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl RetryStrategy for FixedDelay {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn max_attempts(&self) -> u32 {
        0
    }

    fn should_retry(&self, _error: &McpError, _attempt: u32) -> bool {
        false
    }

    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Build the strategy a [`RetryConfig`] describes.
pub fn strategy_from_config(config: &RetryConfig) -> Arc<dyn RetryStrategy> {
    match config {
        RetryConfig::Exponential {
            base_delay_ms,
            max_delay_ms,
            max_attempts,
            jitter,
        } => Arc::new(ExponentialBackoff {
            base_delay: Duration::from_millis(*base_delay_ms),
            max_delay: Duration::from_millis(*max_delay_ms),
            max_attempts: *max_attempts,
            jitter: *jitter,
        }),
        RetryConfig::Fixed {
            delay_ms,
            max_attempts,
        } => Arc::new(FixedDelay {
            delay: Duration::from_millis(*delay_ms),
            max_attempts: *max_attempts,
        }),
        RetryConfig::None => Arc::new(NoRetry),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    strategy: Arc<dyn RetryStrategy>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Arc::new(ExponentialBackoff::default()))
    }
}

impl RetryExecutor {
    pub fn new(strategy: Arc<dyn RetryStrategy>) -> Self {
        Self { strategy }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(strategy_from_config(config))
    }

    pub fn strategy(&self) -> &dyn RetryStrategy {
        self.strategy.as_ref()
    }

    /// Run `op` until it succeeds or the strategy gives up.
    ///
    /// Makes at most `max_attempts + 1` tries. Every failure is classified
    /// before the strategy sees it; the last classified error is returned.
    pub async fn execute<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, McpError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut attempt: u32 = 0;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => McpError::classify(e),
            };

            if !self.strategy.should_retry(&error, attempt) {
                if attempt > 0 {
                    tracing::warn!(
                        operation = label,
                        attempts = attempt + 1,
                        code = error.code(),
                        error = %error,
                        "giving up after retries"
                    );
                }
                return Err(error);
            }

            let delay = self.strategy.delay(attempt);
            tracing::debug!(
                operation = label,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                code = error.code(),
                error = %error,
                "retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::McpErrorKind;

    fn refused() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionRefused, "refused")
    }

    #[test]
    fn exponential_delay_doubles_then_caps() {
        let s = ExponentialBackoff {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(s.delay(0), Duration::from_millis(100));
        assert_eq!(s.delay(1), Duration::from_millis(200));
        assert_eq!(s.delay(5), Duration::from_millis(3_200));
        assert_eq!(s.delay(6), Duration::from_millis(5_000));
        assert_eq!(s.delay(40), Duration::from_millis(5_000));
    }

    #[test]
    fn jitter_stays_in_band_and_under_cap() {
        let s = ExponentialBackoff::default();
        for attempt in 0..12 {
            let delay = s.delay(attempt);
            assert!(delay <= Duration::from_millis(5_000), "attempt {attempt}: {delay:?}");
        }
        for _ in 0..50 {
            let delay = s.delay(2);
            assert!(delay >= Duration::from_millis(200) && delay <= Duration::from_millis(400));
        }
    }

    #[test]
    fn strategies_follow_config() {
        let fixed = strategy_from_config(&RetryConfig::Fixed {
            delay_ms: 250,
            max_attempts: 2,
        });
        assert_eq!(fixed.max_attempts(), 2);
        assert_eq!(fixed.delay(7), Duration::from_millis(250));

        let none = strategy_from_config(&RetryConfig::None);
        assert!(!none.should_retry(&McpError::connection("x"), 0));
    }

    #[tokio::test(start_paused = true)]
    async fn recoverable_failures_use_the_whole_budget() {
        let calls = &AtomicU32::new(0);
        let executor = RetryExecutor::default();

        let err = executor
            .execute("connect", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(refused())
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.kind(), McpErrorKind::Connection);
    }

    #[tokio::test(start_paused = true)]
    async fn non_recoverable_failures_surface_immediately() {
        let calls = &AtomicU32::new(0);
        let executor = RetryExecutor::default();

        let err = executor
            .execute("connect", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(McpError::invalid_request("bad descriptor"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), McpErrorKind::InvalidRequest);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let executor = RetryExecutor::new(Arc::new(FixedDelay {
            delay: Duration::from_secs(1),
            max_attempts: 3,
        }));
        let start = tokio::time::Instant::now();

        let value = executor
            .execute("connect", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(refused())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
