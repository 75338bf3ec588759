//! Retry policies for secret reads and management-interface calls.
//!
//! Every transient operation goes through [`retry_async`]. The default
//! policy waits a fixed second between attempts with no jitter;
//! exponential backoff is available for deployments that want it.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::info;

/// Delay between attempts under the default policy.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How failed attempts are spaced out.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// Same delay after every failed attempt.
    Fixed {
        /// Maximum number of attempts.
        max_attempts: u32,
        /// Delay between attempts.
        delay: Duration,
    },
    /// Delay grows by `backoff_multiplier` after each failure, capped at `max_delay`.
    Exponential {
        /// Maximum number of attempts.
        max_attempts: u32,
        /// Delay after the first failure.
        initial_delay: Duration,
        /// Upper bound on any single delay.
        max_delay: Duration,
        /// Growth factor between consecutive delays.
        backoff_multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3)
    }
}

impl RetryPolicy {
    /// Fixed one-second policy allowing `retries` attempts.
    #[must_use]
    pub const fn fixed(retries: u32) -> Self {
        Self::Fixed {
            max_attempts: retries,
            delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Number of attempts made before giving up. Never less than one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        let configured = match self {
            Self::Fixed { max_attempts, .. } | Self::Exponential { max_attempts, .. } => {
                *max_attempts
            }
        };
        configured.max(1)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay, .. } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
                backoff_multiplier,
                ..
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let secs = initial_delay.as_secs_f64() * backoff_multiplier.powi(exponent);
                if secs.is_finite() && secs < max_delay.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    *max_delay
                }
            }
        }
    }
}

/// Execute an async operation under `policy`.
///
/// # Errors
/// Returns the error of the final attempt once all attempts fail.
pub async fn retry_async<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= max_attempts {
                    return Err(e);
                }

                let delay = policy.delay_after(attempt);
                info!(
                    "{operation_name} failed (attempt {attempt}/{max_attempts}): {e}. Retrying in {delay:?}..."
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(3), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        assert_eq!(RetryPolicy::fixed(0).max_attempts(), 1);
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy::Exponential {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
        assert_eq!(policy.delay_after(40), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_never_exceed_limit_and_last_error_wins() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<(), String> = retry_async(&RetryPolicy::fixed(3), "probe", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("failure {n}")) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err(), "failure 3");
        // Two gaps between three attempts, no sleep after the last one.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_first_success() {
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = retry_async(&RetryPolicy::fixed(5), "probe", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
