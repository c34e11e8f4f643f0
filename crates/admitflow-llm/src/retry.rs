//! Retry logic with configurable backoff policies for provider calls.

use std::future::Future;
use std::time::Duration;

use admitflow_types::{LlmError, Result};

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: initial * factor^attempt, capped at max.
    Exponential {
        initial: Duration,
        factor: f64,
        max: Duration,
    },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential {
                initial,
                factor,
                max,
            } => scaled(*initial, factor.powi(attempt as i32), *max),
            BackoffPolicy::None => Duration::ZERO,
        }
    }

    /// Delay after a rate limit: initial * 2^(attempt+2), capped at max.
    pub fn rate_limit_delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Exponential { initial, max, .. } => {
                scaled(*initial, 2f64.powi(attempt as i32 + 2), *max)
            }
            other => other.delay_for_attempt(attempt),
        }
    }
}

fn scaled(initial: Duration, multiplier: f64, max: Duration) -> Duration {
    Duration::try_from_secs_f64(initial.as_secs_f64() * multiplier)
        .unwrap_or(max)
        .min(max)
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            initial: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Attempt ceiling and backoff for one provider profile.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per profile, including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Use the steeper `2^(attempt+2)` schedule after a rate limit.
    pub steep_rate_limit_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            steep_rate_limit_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` tries with no sleeping in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: BackoffPolicy::None,
            steep_rate_limit_backoff: false,
        }
    }

    /// How long to wait after `error` on the given (0-indexed) attempt.
    ///
    /// A provider `Retry-After` hint raises the delay but never past the policy's cap.
    pub fn delay_after(&self, attempt: u32, error: &LlmError) -> Duration {
        match error {
            LlmError::RateLimited { retry_after_ms, .. } => {
                let computed = if self.steep_rate_limit_backoff {
                    self.backoff.rate_limit_delay(attempt)
                } else {
                    self.backoff.delay_for_attempt(attempt)
                };
                match (&self.backoff, retry_after_ms) {
                    (BackoffPolicy::None, _) | (_, None) => computed,
                    (BackoffPolicy::Exponential { max, .. }, Some(ms)) => {
                        computed.max(Duration::from_millis(*ms)).min(*max)
                    }
                    (BackoffPolicy::Fixed(_), Some(ms)) => {
                        computed.max(Duration::from_millis(*ms))
                    }
                }
            }
            _ => self.backoff.delay_for_attempt(attempt),
        }
    }
}

// ---------------------------------------------------------------------------
// run_with_retry
// ---------------------------------------------------------------------------

/// Final result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Execute an operation with retry logic.
///
/// The closure receives the 1-based attempt number and is called up to
/// `policy.max_attempts` times. Only errors satisfying
/// [`LlmError::is_retryable`] are retried; any other error is returned after the
/// attempt that produced it.
pub async fn run_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    label: &str,
    mut f: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt - 1, &e);
                tracing::warn!(
                    profile = %label,
                    attempt,
                    max_attempts,
                    kind = e.kind(),
                    status = ?e.http_status(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retryable error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt,
                }
            }
        }
    }
}
