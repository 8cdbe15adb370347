//! Caller-level retry policies.
//!
//! Nothing in this workspace retries on its own. Whether a request may be
//! repeated depends on what it does (re-sending a bulk batch with generated
//! ids duplicates documents), so callers opt in by wrapping individual
//! operations:
//!
//! ```rust,no_run
//! use esbridge_rest::{NodeAddress, RestClient, RestRequest, RetryPolicy, Transport};
//! use std::time::Duration;
//!
//! let client = RestClient::with_defaults()?;
//! let node = NodeAddress::new("localhost", 9200);
//! let policy = RetryPolicy::exponential(3, Duration::from_millis(100));
//! let health = policy.run(|| client.execute(&node, RestRequest::get("/_cluster/health")))?;
//! # Ok::<(), esbridge_rest::TransportError>(())
//! ```

use std::fmt::Display;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::TransportError;

/// Errors that know whether repeating the failed operation may succeed.
pub trait Retryable {
    /// Check if the operation should be retried.
    fn is_retryable(&self) -> bool;
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        TransportError::is_retryable(self)
    }
}

/// Retry policy applied around one caller operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Maximum total time spent retrying.
    pub max_retry_time: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_millis(100),
                max: Duration::from_secs(10),
                multiplier: 2.0,
            },
            max_retry_time: Some(Duration::from_secs(60)),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Exponential {
                initial: initial_delay,
                max: Duration::from_secs(30),
                multiplier: 2.0,
            },
            ..Default::default()
        }
    }

    /// Create a policy with linear backoff.
    pub fn linear(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Linear {
                delay,
                max: Duration::from_secs(30),
            },
            ..Default::default()
        }
    }

    /// Create a policy with constant delay.
    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Constant(delay),
            ..Default::default()
        }
    }

    /// Create a policy with no delay.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::None,
            ..Default::default()
        }
    }

    /// Set maximum total retry time.
    pub fn with_max_retry_time(mut self, duration: Duration) -> Self {
        self.max_retry_time = Some(duration);
        self
    }

    /// Calculate delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }

    /// Run `op`, blocking between attempts while the error is retryable.
    ///
    /// The last error is returned once attempts or time run out.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Result<T, E>,
    {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let out_of_time = self
                        .max_retry_time
                        .is_some_and(|max| start.elapsed() > max);
                    if !e.is_retryable() || attempt + 1 >= self.max_attempts || out_of_time {
                        return Err(e);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    debug!(attempt = attempt + 1, error = %e, delay_ms = delay.as_millis() as u64, "Retrying operation");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear backoff: delay increases by a fixed amount.
    Linear {
        /// Delay increment per attempt.
        delay: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff: delay doubles each attempt.
    Exponential {
        /// Initial delay.
        initial: Duration,
        /// Maximum delay.
        max: Duration,
        /// Multiplier (typically 2.0).
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Calculate delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Linear { delay, max } => {
                let total = delay.saturating_mul(attempt + 1);
                total.min(*max)
            }
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let factor = multiplier.powi(attempt as i32);
                let millis = (initial.as_millis() as f64 * factor) as u64;
                Duration::from_millis(millis).min(*max)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn unavailable() -> TransportError {
        TransportError::Status {
            method: "POST".to_string(),
            path: "/_bulk".to_string(),
            status: 503,
            body: String::new(),
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let strategy = BackoffStrategy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
        };

        assert_eq!(strategy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_linear_backoff() {
        let strategy = BackoffStrategy::Linear {
            delay: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };

        assert_eq!(strategy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for_attempt(9), Duration::from_secs(1));
    }

    #[test]
    fn test_run_retries_until_success() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::immediate(3);

        let result: Result<u32, TransportError> = policy.run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(unavailable())
            } else {
                Ok(7)
            }
        });

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_run_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::immediate(2);

        let result: Result<(), TransportError> = policy.run(|| {
            calls.set(calls.get() + 1);
            Err(unavailable())
        });

        assert_eq!(result.unwrap_err().status_code(), Some(503));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_run_does_not_retry_fatal_errors() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::immediate(5);

        let result: Result<(), TransportError> = policy.run(|| {
            calls.set(calls.get() + 1);
            Err(TransportError::Closed)
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
