//! Exponential backoff recovery actions for operator retries.
//!
//! A [`BackoffPolicy`] produces recovery closures for `retry_with`: each call
//! sleeps for the next delay of the schedule, and fails once the policy's
//! retries are used up, which ends the send with `RetryingRejected`.
//!
//! # Example
//!
//! ```rust
//! use requester_core::operator::Guard;
//! use requester_runtime::backoff::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! let online = Guard::allow_if(|| true).retry_with(policy.recovery());
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use requester_core::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Cause of the error returned by an exhausted recovery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Backoff exhausted after {attempts} retries")]
pub struct BackoffExhausted {
    /// Retries granted before giving up
    pub attempts: u32,
}

/// Backoff schedule configuration.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: false
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of recoveries granted
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Scale every delay by a random factor in `0.5..=1.0`
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> BackoffPolicyBuilder {
        BackoffPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Calculate the delay for a given retry number.
    ///
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let seconds = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        Duration::try_from_secs_f64(seconds)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }

    /// Build a recovery action for `retry_with`.
    ///
    /// The returned closure counts its own calls: call `n` sleeps for
    /// `delay_for_attempt(n)` and resolves `Ok`, until `max_retries` calls
    /// were granted, after which it fails with [`BackoffExhausted`]. Clones of
    /// the closure share the count.
    pub fn recovery(
        &self,
    ) -> impl Fn() -> BoxFuture<'static, Result<(), Error>> + Clone + Send + Sync + 'static {
        let policy = self.clone();
        let attempts = Arc::new(AtomicU32::new(0));

        move || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            if attempt >= policy.max_retries {
                tracing::warn!(attempt, "Backoff exhausted");
                let exhausted = BackoffExhausted {
                    attempts: policy.max_retries,
                };
                return futures::future::ready(Err(Error::custom(exhausted))).boxed();
            }

            let delay = policy.jittered(policy.delay_for_attempt(attempt));
            tracing::debug!(attempt, delay_ms = delay.as_millis(), "Backing off before retry");
            sleep(delay).map(Ok).boxed()
        }
    }
}

/// Builder for [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct BackoffPolicyBuilder {
    policy: BackoffPolicy,
}

impl BackoffPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Randomise each delay between half and all of its value.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Build the [`BackoffPolicy`].
    #[must_use]
    pub fn build(self) -> BackoffPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let policy = BackoffPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = BackoffPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        // 1000ms * 10^5 = 100,000,000ms, but capped at 2000ms
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy::builder().jitter(true).build();
        for _ in 0..100 {
            let delay = policy.jittered(Duration::from_millis(100));
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_recovery_exhausts() {
        let policy = BackoffPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build();
        let recovery = policy.recovery();
        let shared = recovery.clone();

        assert!(recovery().await.is_ok());
        assert!(shared().await.is_ok());

        let exhausted = recovery().await;
        assert!(exhausted.is_err_and(|e| {
            e.downcast_ref::<BackoffExhausted>() == Some(&BackoffExhausted { attempts: 2 })
        }));
    }

    proptest::proptest! {
        #[test]
        fn prop_delay_is_capped_and_monotonic(
            initial_ms in 1u64..1_000,
            max_ms in 1u64..60_000,
            multiplier in 1.0f64..8.0,
            attempt in 0u32..64,
        ) {
            let policy = BackoffPolicy::builder()
                .initial_delay(Duration::from_millis(initial_ms))
                .max_delay(Duration::from_millis(max_ms))
                .multiplier(multiplier)
                .build();

            let delay = policy.delay_for_attempt(attempt);
            proptest::prop_assert!(delay <= policy.max_delay);
            proptest::prop_assert!(delay <= policy.delay_for_attempt(attempt + 1));
        }
    }
}
