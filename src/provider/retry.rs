use std::{fmt, future::Future, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{dual_debug, dual_warn, provider::ProviderError};

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * attempt`: 1s, 2s, 3s, ... for a one second base
    #[default]
    Linear,
    /// `base * 2^(attempt - 1)`: 1s, 2s, 4s, ... for a one second base
    Exponential,
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffStrategy::Linear => write!(f, "linear"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
        }
    }
}

type RetryPredicate = Arc<dyn Fn(&ProviderError) -> bool + Send + Sync>;

/// Retry behaviour for provider calls.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Zero behaves as one.
    pub max_attempts: u32,
    /// Delay unit fed to the backoff strategy
    pub base_delay: Duration,
    pub backoff: BackoffStrategy,
    retry_if: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            backoff: BackoffStrategy::Linear,
            retry_if: Arc::new(|_| true),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff,
            ..Default::default()
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, BackoffStrategy::Linear)
    }

    /// Only retry failures for which `predicate` returns true.
    pub fn with_retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ProviderError) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Arc::new(predicate);
        self
    }

    /// Only retry quota and overload failures.
    pub fn transient_only(self) -> Self {
        self.with_retry_if(ProviderError::is_transient)
    }

    /// Wait inserted after the failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
        }
    }

    pub fn should_retry(&self, error: &ProviderError) -> bool {
        (self.retry_if)(error)
    }

    /// Run `operation` until it succeeds, the error is not retryable, or the
    /// attempts run out. The last error is returned in the latter two cases.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    dual_warn!("Attempt {} failed: {}", attempt, err);

                    if attempt >= max_attempts {
                        return Err(err);
                    }
                    if !self.should_retry(&err) {
                        dual_debug!("Not retrying: {}", err);
                        return Err(err);
                    }

                    let delay = self.delay_for(attempt);
                    dual_debug!(
                        "Retrying in {} ms (attempt {} of {})",
                        delay.as_millis(),
                        attempt + 1,
                        max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500), BackoffStrategy::Exponential);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_only_stops_on_permanent_error() {
        let policy = RetryPolicy::default().transient_only();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Authentication("API_KEY_INVALID".into())) }
            })
            .await;

        assert_eq!(result, Err(ProviderError::Authentication("API_KEY_INVALID".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_only_retries_overload() {
        let policy = RetryPolicy::default().transient_only();
        let calls = AtomicU32::new(0);

        let result = policy
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(ProviderError::Overloaded("503".into()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_makes_one_attempt() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = RetryPolicy::no_retry()
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Overloaded("503".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
