//! Retry logic with exponential backoff.
//!
//! The router's testable determinism property requires the delay sequence
//! to be a pure function of the attempt number, so [`RetryPolicy::default`]
//! carries no jitter. `jitter_factor` is kept for general-purpose callers
//! that do want it (it defaults to `0.0` everywhere in this workspace).

use super::{CdcError, ErrorCategory};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// The sink resilient wrapper's policy: initialDelay=2s, maxRetries=3,
    /// delay = min(initialDelay * 2^attempt, 60s), no jitter.
    pub fn sink_default() -> Self {
        Self::default()
    }

    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Delay before the given attempt (1-indexed). Attempt 0 means "first
    /// try, no delay yet".
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let mut delay = self.initial_delay.as_millis() as f64;
        if self.multiplier > 1.0 {
            delay *= self.multiplier.powi(attempt as i32 - 1);
        }
        delay = delay.min(self.max_delay.as_millis() as f64);
        if self.jitter_factor > 0.0 {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(-self.jitter_factor..=self.jitter_factor);
            delay *= 1.0 + jitter;
        }
        Duration::from_millis(delay as u64)
    }

    pub fn should_retry(&self, error: &CdcError, attempt: u32) -> bool {
        attempt < self.max_attempts && is_retryable_error(error)
    }
}

pub trait RetryableError {
    fn is_retryable(&self) -> bool;
    fn category(&self) -> ErrorCategory;
}

impl RetryableError for CdcError {
    fn is_retryable(&self) -> bool {
        is_retryable_error(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            CdcError::ConnectionError { .. }
            | CdcError::SinkTransient { .. }
            | CdcError::DatabaseConnectivity { .. }
            | CdcError::DatabaseError { .. } => ErrorCategory::Transient,

            CdcError::InvalidEventData { .. }
            | CdcError::ValidationError { .. }
            | CdcError::ConfigurationError(_) => ErrorCategory::User,

            CdcError::SlotInvalidated { .. }
            | CdcError::LeaseLost { .. }
            | CdcError::JobCancelled { .. } => ErrorCategory::Permanent,

            CdcError::DecodeSkip { .. } => ErrorCategory::Permanent,

            CdcError::DlqPersistFailure { .. }
            | CdcError::SerializationError { .. }
            | CdcError::Internal { .. } => ErrorCategory::System,
        }
    }
}

fn is_retryable_error(error: &CdcError) -> bool {
    matches!(
        error,
        CdcError::ConnectionError { .. }
            | CdcError::SinkTransient { .. }
            | CdcError::DatabaseConnectivity { .. }
            | CdcError::DatabaseError { .. }
    )
}

/// Retry an async operation with the given policy, sleeping between
/// attempts. Returns the last error once attempts are exhausted.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, CdcError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CdcError>>,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                if !policy.should_retry(&error, attempt) {
                    tracing::error!(error = %error, attempt, "operation failed, no more retries");
                    return Err(error);
                }
                let delay = policy.calculate_delay(attempt + 1);
                tracing::warn!(
                    error = %error,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );
                attempt += 1;
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delay_sequence_is_deterministic() {
        let policy = RetryPolicy::sink_default();
        assert_eq!(policy.calculate_delay(0), Duration::ZERO);
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(policy.calculate_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.calculate_delay(6), Duration::from_secs(60));
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(500));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(500));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let attempt_counter = Arc::new(AtomicU32::new(0));
        let counter = attempt_counter.clone();
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            ..RetryPolicy::sink_default()
        };
        let result = retry_with_policy(&policy, move |_attempt| {
            let counter = counter.clone();
            async move {
                let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if current < 3 {
                    Err(CdcError::connection_error("temporary"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempt_counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let attempt_counter = Arc::new(AtomicU32::new(0));
        let counter = attempt_counter.clone();
        let policy = RetryPolicy::sink_default();
        let result: Result<(), CdcError> = retry_with_policy(&policy, move |_attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CdcError::invalid_event_data("bad shape"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempt_counter.load(Ordering::SeqCst), 1);
    }
}
