//! Retry policy and the generic retry loop

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::llm::{ErrorClass, LlmError};

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0 for the first retry)
    ///
    /// `base_delay * multiplier^retry`, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 1.5,
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Errors that know how the retry loop should treat them
pub trait Classify {
    fn class(&self) -> ErrorClass;

    /// Server-requested wait, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Classify for LlmError {
    fn class(&self) -> ErrorClass {
        LlmError::class(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        LlmError::retry_after(self)
    }
}

/// A failure the caller can branch on
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{class} error: {message}")]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Fatal, message)
    }

    pub fn data_quality(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::DataQuality, message)
    }

    pub fn is_fatal(&self) -> bool {
        self.class == ErrorClass::Fatal
    }
}

impl From<LlmError> for ClassifiedError {
    fn from(err: LlmError) -> Self {
        Self::new(err.class(), err.to_string())
    }
}

/// Result of a call made through the retry loop
#[derive(Debug, Clone)]
pub struct CallOutcome<T> {
    /// Attempts actually made, at least 1
    pub attempts: u32,
    pub elapsed: Duration,
    pub result: Result<T, ClassifiedError>,
}

impl<T> CallOutcome<T> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ClassifiedError> {
        self.result.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, ClassifiedError> {
        self.result
    }

    /// Transform the success value, keeping attempt accounting
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallOutcome<U> {
        CallOutcome {
            attempts: self.attempts,
            elapsed: self.elapsed,
            result: self.result.map(f),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out
///
/// `op` receives the 1-based attempt number. Only `Retryable` failures are retried; the final
/// failure is returned as a `ClassifiedError` inside the outcome, never as a panic.
pub async fn call_with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> CallOutcome<T>
where
    E: Classify + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    debug!(%label, max_attempts = policy.max_attempts, "call_with_retry: called");
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match op(attempt).await {
            Ok(value) => {
                debug!(%label, attempt, "call_with_retry: success");
                return CallOutcome {
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    result: Ok(value),
                };
            }
            Err(err) => err,
        };

        let class = err.class();
        if class != ErrorClass::Retryable || attempt >= max_attempts {
            warn!(
                %label,
                attempt,
                %class,
                error = %err,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "call_with_retry: giving up"
            );
            return CallOutcome {
                attempts: attempt,
                elapsed: started.elapsed(),
                result: Err(ClassifiedError::new(class, err.to_string())),
            };
        }

        let mut backoff = policy.delay_for(attempt - 1);
        if let Some(requested) = err.retry_after() {
            backoff = backoff.max(requested.min(policy.max_delay));
        }
        warn!(
            %label,
            attempt,
            next_attempt = attempt + 1,
            backoff_ms = backoff.as_millis() as u64,
            elapsed_ms = started.elapsed().as_millis() as u64,
            error = %err,
            "call_with_retry: retrying after transient error"
        );
        tokio::time::sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(350),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = fast_policy(5);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn test_default_policy_matches_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(3));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_transient_failures_then_success() {
        let calls = AtomicU32::new(0);
        let outcome = call_with_retry(&fast_policy(3), "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(LlmError::Connection("reset".to_string()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.value(), Some(&"done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff on the paused clock
        assert_eq!(outcome.elapsed, Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_never_retries() {
        let calls = AtomicU32::new(0);
        let outcome: CallOutcome<()> = call_with_retry(&fast_policy(5), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(LlmError::ApiError {
                    status: 401,
                    message: "bad key".to_string(),
                })
            }
        })
        .await;

        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = outcome.error().unwrap();
        assert!(err.is_fatal());
        assert!(err.message.contains("bad key"));
        assert_eq!(outcome.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_classified_error() {
        let outcome: CallOutcome<()> = call_with_retry(&fast_policy(4), "test", |_| async {
            Err(LlmError::ApiError {
                status: 503,
                message: "overloaded".to_string(),
            })
        })
        .await;

        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.error().unwrap().class, ErrorClass::Retryable);
        // 100 + 200 + 350 (capped)
        assert_eq!(outcome.elapsed, Duration::from_millis(650));
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_quality_errors_are_not_retried() {
        let outcome: CallOutcome<()> =
            call_with_retry(&fast_policy(3), "test", |_| async { Err(LlmError::EmptyResponse) }).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error().unwrap().class, ErrorClass::DataQuality);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honoured_up_to_cap() {
        let outcome = call_with_retry(&fast_policy(2), "test", |attempt| async move {
            if attempt == 1 {
                Err(LlmError::RateLimited {
                    retry_after: Duration::from_secs(60),
                })
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.elapsed, Duration::from_millis(350));
    }

    #[test]
    fn test_outcome_map_keeps_attempts() {
        let outcome = CallOutcome {
            attempts: 2,
            elapsed: Duration::from_millis(5),
            result: Ok::<_, ClassifiedError>(21),
        };
        let doubled = outcome.map(|v| v * 2);
        assert_eq!(doubled.attempts, 2);
        assert_eq!(doubled.into_result().unwrap(), 42);
    }
}
