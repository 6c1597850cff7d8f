//! Retry logic for single API calls
//!
//! Retrying is split in two:
//! - [`RetryPolicy::decide`] is a pure function from (attempts so far, error) to
//!   a [`RetryDecision`]. It performs no I/O and is trivially testable.
//! - [`with_retry`] runs an async operation, sleeping as the policy decides.
//!
//! Rate-limit responses get their own cooldown and do not consume the attempt
//! budget.
//!
//! # Example
//!
//! ```no_run
//! use catalog_harvest::config::{PacingConfig, RetryConfig};
//! use catalog_harvest::retry::{IsRetryable, RetryClass, RetryPolicy, with_retry};
//!
//! #[derive(Debug)]
//! struct Flaky;
//!
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("flaky")
//!     }
//! }
//!
//! impl IsRetryable for Flaky {
//!     fn retry_class(&self) -> RetryClass {
//!         RetryClass::Transient
//!     }
//! }
//!
//! # async fn example() {
//! let policy = RetryPolicy::new(&RetryConfig::default(), &PacingConfig::default());
//! let result = with_retry(&policy, "example", || async { Ok::<_, Flaky>(42) }).await;
//! assert!(result.is_ok());
//! # }
//! ```

use crate::config::{PacingConfig, RetryConfig};
use crate::error::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// How an error should be treated by the retry loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryClass {
    /// Worth another attempt after the normal backoff
    Transient,
    /// Quota exhausted; wait out the cooldown without spending an attempt
    RateLimited,
    /// Retrying cannot help
    Fatal,
}

/// Trait for errors that can be classified for retrying
pub trait IsRetryable {
    /// Classify this error
    fn retry_class(&self) -> RetryClass;

    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool {
        self.retry_class() == RetryClass::Transient
    }
}

impl IsRetryable for FetchError {
    fn retry_class(&self) -> RetryClass {
        match self {
            // Timeouts, refused connections, truncated bodies
            FetchError::Transport { .. } => RetryClass::Transient,
            // Shape problems are usually a hiccup upstream
            FetchError::MalformedResponse { .. } => RetryClass::Transient,
            FetchError::QuotaExceeded { .. } => RetryClass::RateLimited,
            // Server-side failures and request timeouts can clear up
            FetchError::Http { status, .. } if *status >= 500 || *status == 408 => {
                RetryClass::Transient
            }
            // 404, 422 and friends will not change on retry
            FetchError::Http { .. } => RetryClass::Fatal,
            // A bad credential never fixes itself
            FetchError::Authentication { .. } => RetryClass::Fatal,
            FetchError::RetriesExhausted { .. } => RetryClass::Fatal,
        }
    }
}

/// What the retry loop should do after a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`, spending one attempt
    Retry {
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// Wait out a rate limit, then try again without spending an attempt
    Cooldown {
        /// Cooldown before the next attempt
        delay: Duration,
    },
    /// Stop and report the error
    GiveUp,
}

/// Fixed-interval retry policy
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts allowed, first try included
    pub max_attempts: u32,
    /// Delay between attempts
    pub backoff: Duration,
    /// Add random jitter to the backoff
    pub jitter: bool,
    /// Delay after a rate-limit response
    pub cooldown: Duration,
    /// Consecutive rate-limit cooldowns tolerated
    pub max_cooldowns: u32,
}

impl RetryPolicy {
    /// Build the policy from configuration
    pub fn new(retry: &RetryConfig, pacing: &PacingConfig) -> Self {
        Self {
            max_attempts: retry.max_attempts.max(1),
            backoff: retry.backoff,
            jitter: retry.jitter,
            cooldown: pacing.rate_limit_cooldown,
            max_cooldowns: pacing.max_rate_limit_waits,
        }
    }

    /// Decide what to do after a failure
    ///
    /// `attempts` counts the attempts already spent, including the one that
    /// just failed unless it was rate limited. `cooldowns` counts the
    /// consecutive rate-limit waits so far.
    pub fn decide<E: IsRetryable>(&self, attempts: u32, cooldowns: u32, error: &E) -> RetryDecision {
        match error.retry_class() {
            RetryClass::Fatal => RetryDecision::GiveUp,
            RetryClass::RateLimited if cooldowns < self.max_cooldowns => RetryDecision::Cooldown {
                delay: self.cooldown,
            },
            RetryClass::RateLimited => RetryDecision::GiveUp,
            RetryClass::Transient if attempts < self.max_attempts => RetryDecision::Retry {
                delay: self.backoff,
            },
            RetryClass::Transient => RetryDecision::GiveUp,
        }
    }
}

/// Why [`with_retry`] stopped
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was not retryable
    Fatal(E),
    /// The attempt or cooldown budget ran out
    Exhausted {
        /// Attempts spent (rate-limit cooldowns excluded)
        attempts: u32,
        /// The last error observed
        last: E,
    },
}

/// Execute an async operation, retrying as `policy` decides
///
/// # Arguments
///
/// * `policy` - Attempt budget, backoff and cooldown
/// * `context` - Label used in log lines (e.g., "year 2021, page 3")
/// * `operation` - Async closure returning `Result<T, E>`
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    context: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempts = 0u32;
    let mut cooldowns = 0u32;

    loop {
        let error = match operation().await {
            Ok(result) => {
                if attempts > 0 {
                    tracing::info!(context, attempts = attempts + 1, "Request succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        let class = error.retry_class();
        if class == RetryClass::RateLimited {
            cooldowns += 1;
        } else {
            attempts += 1;
            cooldowns = 0;
        }

        // `cooldowns` was already bumped for this failure, so compare against the previous count
        match policy.decide(attempts, cooldowns.saturating_sub(1), &error) {
            RetryDecision::Retry { delay } => {
                let delay = if policy.jitter { add_jitter(delay) } else { delay };
                tracing::warn!(
                    context,
                    error = %error,
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::Cooldown { delay } => {
                tracing::warn!(
                    context,
                    cooldowns,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, cooling down"
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::GiveUp if class == RetryClass::Fatal => {
                tracing::error!(context, error = %error, "Request failed with non-retryable error");
                return Err(RetryError::Fatal(error));
            }
            RetryDecision::GiveUp => {
                tracing::error!(
                    context,
                    error = %error,
                    attempts,
                    cooldowns,
                    "Request failed after all retry attempts exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts,
                    last: error,
                });
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The result is uniformly distributed between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
