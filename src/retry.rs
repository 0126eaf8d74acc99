//! Fixed-delay retry policy shared by chunk processing, store calls, and artifact writes.

use crate::config::PipelineSettings;
use crate::metrics::PipelineMetrics;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Classifies errors that are worth another attempt.
pub trait Transient {
    /// Whether retrying the failed operation may succeed.
    fn is_transient(&self) -> bool {
        true
    }
}

/// Bounded retry budget with a fixed delay between attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl RetryPolicy {
    /// Build a policy granting `max_attempts` attempts (at least one) spaced by `delay`.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            metrics: None,
        }
    }

    /// Build a policy from pipeline settings.
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(settings.retry_max_attempts, settings.retry_delay)
    }

    /// Count every retry in the supplied metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Total attempts granted, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay applied between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `operation` until it succeeds, fails permanently, or exhausts the budget.
    ///
    /// The closure receives the 1-based attempt number. The last error is returned on
    /// exhaustion.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_transient() => {
                    tracing::warn!(
                        operation = label,
                        attempt,
                        error = %error,
                        "Operation failed permanently"
                    );
                    return Err(error);
                }
                Err(error) if attempt >= self.max_attempts => {
                    tracing::error!(
                        operation = label,
                        attempts = attempt,
                        error = %error,
                        "Operation failed after exhausting retries"
                    );
                    return Err(error);
                }
                Err(error) => {
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed; retrying"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry();
                    }
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky {
        permanent: bool,
    }

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky (permanent: {})", self.permanent)
        }
    }

    impl Transient for Flaky {
        fn is_transient(&self) -> bool {
            !self.permanent
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let metrics = Arc::new(PipelineMetrics::new());
        let policy = quick_policy().with_metrics(metrics.clone());

        let result: Result<u32, Flaky> = policy
            .run("test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(Flaky { permanent: false })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.expect("third attempt succeeds"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.snapshot().retries, 2);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = quick_policy()
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky { permanent: false }) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = quick_policy()
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky { permanent: true }) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
