use crate::{Error, Result};
use std::fmt::Display;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum jitter as a fraction of the delay (0 disables it)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// Create config for fast retries against a local endpoint
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            jitter: 0.0,
        }
    }

    /// Backoff before the attempt following `attempt` (1-based):
    /// `min(base_delay * backoff_factor^(attempt-1), max_delay)`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        if capped_secs.is_finite() && capped_secs >= 0.0 {
            Duration::from_secs_f64(capped_secs)
        } else {
            self.max_delay
        }
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(u32, &E, Duration) + Send + Sync>;

/// Reusable retry decorator: a fixed config, a retryability predicate and
/// an optional hook invoked before each backoff sleep.
pub struct RetryPolicy<E> {
    config: RetryConfig,
    is_retryable: RetryPredicate<E>,
    on_retry: Option<RetryHook<E>>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            is_retryable: Arc::clone(&self.is_retryable),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("on_retry", &self.on_retry.is_some())
            .finish_non_exhaustive()
    }
}

impl<E: 'static> RetryPolicy<E> {
    /// Policy that treats every error as retryable
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            is_retryable: Arc::new(|_: &E| true),
            on_retry: None,
        }
    }

    /// Only retry errors matching `predicate`; others propagate immediately
    #[must_use]
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.is_retryable = Arc::new(predicate);
        self
    }

    /// Invoke `hook(attempt, error, delay)` before sleeping for a retry
    #[must_use]
    pub fn on_retry(mut self, hook: impl Fn(u32, &E, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    #[must_use]
    pub fn is_retryable(&self, error: &E) -> bool {
        (self.is_retryable)(error)
    }

    /// Run `operation` under this policy
    pub fn run<T, F>(&self, operation_name: &str, operation: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> std::result::Result<T, E>,
        E: Display,
    {
        retry_with_policy(operation, self, operation_name)
    }
}

impl RetryPolicy<Error> {
    /// Policy for the crate's own errors, retrying only transient ones
    #[must_use]
    pub fn transient(config: RetryConfig) -> Self {
        Self::new(config).retry_if(Error::is_retryable)
    }
}

/// Execute an operation with retry logic.
///
/// The error returned after the last attempt, or by a non-retryable
/// failure, is the operation's own error, untouched.
pub fn retry_with_policy<T, E, F>(
    mut operation: F,
    policy: &RetryPolicy<E>,
    operation_name: &str,
) -> std::result::Result<T, E>
where
    F: FnMut() -> std::result::Result<T, E>,
    E: Display + 'static,
{
    let max_attempts = policy.config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        debug!(operation = operation_name, attempt, "Executing operation");

        let error = match operation() {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !policy.is_retryable(&error) {
            debug!(
                operation = operation_name,
                attempt,
                error = %error,
                "Operation failed with non-retryable error"
            );
            return Err(error);
        }

        if attempt >= max_attempts {
            warn!(
                operation = operation_name,
                attempts = attempt,
                error = %error,
                "Operation failed after exhausting retries"
            );
            return Err(error);
        }

        let delay = add_jitter(policy.config.delay_for_attempt(attempt), policy.config.jitter);

        if let Some(hook) = &policy.on_retry {
            hook(attempt, &error, delay);
        }

        debug!(
            operation = operation_name,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Operation failed, retrying"
        );

        sleep(delay);
        attempt += 1;
    }
}

/// Add jitter to delay
fn add_jitter(delay: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || delay.is_zero() {
        return delay;
    }

    use rand::Rng;
    let max_extra = delay.as_secs_f64() * jitter_factor;
    let extra = rand::thread_rng().gen_range(0.0..=max_extra);

    delay + Duration::from_secs_f64(extra)
}

/// Convenience function for simple retry with the default config
pub fn retry<T, F>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    retry_with_config(operation, RetryConfig::default(), operation_name)
}

/// Convenience function for retry with custom config, retrying transient errors
pub fn retry_with_config<T, F>(operation: F, config: RetryConfig, operation_name: &str) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    retry_with_policy(operation, &RetryPolicy::transient(config), operation_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn quick_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn unavailable() -> Error {
        Error::ServiceUnavailable {
            service: "test".to_string(),
            reason: "temporary failure".to_string(),
        }
    }

    #[test]
    fn test_retry_success_on_first_attempt() {
        let result = retry(|| Ok::<u32, Error>(42), "test_operation");
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_retry_success_after_failures() {
        let counter = AtomicU32::new(0);

        let result = retry_with_config(
            || {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(unavailable())
                } else {
                    Ok(42u32)
                }
            },
            quick_config(3),
            "test_operation",
        );

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_permanent_error_no_retry() {
        let counter = AtomicU32::new(0);

        let result = retry_with_config(
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<u32, Error>(Error::InvalidInput {
                    field: "test".to_string(),
                    reason: "invalid".to_string(),
                })
            },
            quick_config(5),
            "test_operation",
        );

        assert!(matches!(result, Err(Error::InvalidInput { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1); // Should not retry
    }

    #[test]
    fn test_retry_max_attempts_returns_original_error() {
        let counter = AtomicU32::new(0);

        let result = retry_with_config(
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<u32, Error>(unavailable())
            },
            quick_config(2),
            "test_operation",
        );

        assert!(matches!(result, Err(Error::ServiceUnavailable { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 2); // Should try exactly max_attempts times
    }

    #[test]
    fn test_custom_error_type_and_hook() {
        #[derive(Debug, PartialEq)]
        struct Flaky(u32);

        impl Display for Flaky {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "flaky #{}", self.0)
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let policy = RetryPolicy::new(quick_config(4))
            .on_retry(move |attempt, err: &Flaky, _delay| {
                seen_clone.lock().unwrap().push((attempt, err.0));
            });

        let mut calls = 0;
        let result: std::result::Result<(), Flaky> = policy.run("flaky", || {
            calls += 1;
            Err(Flaky(calls))
        });

        assert_eq!(result, Err(Flaky(4)));
        assert_eq!(*seen.lock().unwrap(), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_delay_formula() {
        let config = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            backoff_factor: 2.0,
            jitter: 0.0,
        };

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(1_000));
        assert_eq!(config.delay_for_attempt(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_calculation() {
        let delay = Duration::from_millis(1000);
        let jittered = add_jitter(delay, 0.1);

        // Jittered delay should be between 1000ms and 1100ms
        assert!(jittered >= delay);
        assert!(jittered <= delay + Duration::from_millis(100));
        assert_eq!(add_jitter(delay, 0.0), delay);
    }

    #[test]
    fn test_zero_max_attempts_still_calls_once() {
        let counter = AtomicU32::new(0);
        let result = retry_with_config(
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), Error>(unavailable())
            },
            quick_config(0),
            "test_operation",
        );
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
