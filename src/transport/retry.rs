//! Retry logic with exponential backoff for transient request failures.
//!
//! # Overview
//!
//! [`RetryPolicy`] decides *whether* an attempt is retried and *how long* to
//! wait first; [`RetryingTransport`] runs the attempt loop on top of a
//! [`RequestExecutor`], waiting through an injectable [`Sleeper`].
//!
//! An attempt is retried when:
//! - the executor reports a connection-level failure (refused, reset, timeout)
//!   and the policy retries connection errors, or
//! - the response status is in the policy's retryable set.
//!
//! # Delay Calculation
//!
//! ```text
//! delay(n) = backoff_factor * 2^n   (n = 0 before the first retry)
//! ```
//!
//! With the defaults (factor 0.3) the waits are 0.3s, 0.6s, 1.2s.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use spider_core::transport::RetryPolicy;
//!
//! let policy = RetryPolicy::new(3, 0.5).unwrap().with_retryable_statuses([503]);
//! assert_eq!(policy.delay_for(0), Duration::from_millis(500));
//! assert_eq!(policy.delay_for(2), Duration::from_secs(2));
//! assert!(policy.is_retryable_status(503));
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::constants::{DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_RETRIES, DEFAULT_RETRYABLE_STATUSES};
use super::error::TransportError;
use super::executor::{HttpResponse, PreparedRequest, RequestExecutor};

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 3 retries (4 attempts in total)
/// - `backoff_factor`: 0.3 seconds
/// - `retryable_status_codes`: 403, 408, 500, 502, 504
/// - `retry_on_connection_error`: true
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    max_attempts: u32,

    /// Base of the exponential backoff, in seconds.
    backoff_factor: f64,

    /// Statuses treated as transient.
    retryable_status_codes: BTreeSet<u16>,

    /// Whether connection-level failures are retried.
    retry_on_connection_error: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
            retry_on_connection_error: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the default status set and connection retries on.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidPolicy`] if `backoff_factor` is negative
    /// or not finite.
    pub fn new(max_attempts: u32, backoff_factor: f64) -> Result<Self, TransportError> {
        if !backoff_factor.is_finite() || backoff_factor < 0.0 {
            return Err(TransportError::invalid_policy(format!(
                "backoff_factor must be a finite value >= 0, got {backoff_factor}"
            )));
        }
        Ok(Self {
            max_attempts,
            backoff_factor,
            ..Self::default()
        })
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Returns a copy with a different retryable status set.
    #[must_use]
    pub fn with_retryable_statuses(self, statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            retryable_status_codes: statuses.into_iter().collect(),
            ..self
        }
    }

    /// Returns a copy with connection retries switched on or off.
    #[must_use]
    pub fn with_connection_retries(self, enabled: bool) -> Self {
        Self {
            retry_on_connection_error: enabled,
            ..self
        }
    }

    /// Retries allowed after the first attempt.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff factor in seconds.
    #[must_use]
    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Statuses treated as transient.
    #[must_use]
    pub fn retryable_status_codes(&self) -> &BTreeSet<u16> {
        &self.retryable_status_codes
    }

    /// Whether connection-level failures are retried.
    #[must_use]
    pub fn retry_on_connection_error(&self) -> bool {
        self.retry_on_connection_error
    }

    /// Returns true if `status` should trigger another attempt.
    #[must_use]
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Wait before retry number `attempt_index` (0-based).
    ///
    /// Formula: `backoff_factor * 2^attempt_index` seconds, saturating at
    /// [`Duration::MAX`].
    #[must_use]
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        if self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let secs = self.backoff_factor * 2f64.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// The wait between attempts.
///
/// Injected so tests can record delays instead of sleeping.
#[async_trait]
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    /// Suspends the current task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Wraps a [`RequestExecutor`] with retry-on-failure and retry-on-status.
///
/// On the last attempt a retryable status is returned as a normal response;
/// callers must check the status themselves.
#[derive(Debug, Clone)]
pub struct RetryingTransport {
    executor: Arc<dyn RequestExecutor>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    retry_non_idempotent: bool,
}

impl RetryingTransport {
    /// Creates a transport that waits with [`TokioSleeper`].
    #[must_use]
    pub fn new(executor: Arc<dyn RequestExecutor>, policy: RetryPolicy) -> Self {
        Self {
            executor,
            sleeper: Arc::new(TokioSleeper),
            policy,
            retry_non_idempotent: false,
        }
    }

    /// Replaces the wait implementation.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Opts POST and PATCH requests into the retry policy.
    #[must_use]
    pub fn retry_non_idempotent(mut self, enabled: bool) -> Self {
        self.retry_non_idempotent = enabled;
        self
    }

    /// The policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes `request`, retrying per the policy.
    ///
    /// Status retries are skipped when `request.retry_statuses` is false.
    ///
    /// # Errors
    ///
    /// - [`TransportError::ConnectionExhausted`] if every attempt failed at the
    ///   connection level.
    /// - [`TransportError::RequestTimeout`] if every attempt failed and the last
    ///   one timed out.
    /// - Any non-connection error from the executor, unretried.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn execute(&self, request: PreparedRequest) -> Result<HttpResponse, TransportError> {
        let retries = if request.is_idempotent() || self.retry_non_idempotent {
            self.policy.max_attempts
        } else {
            0
        };
        let url = request.url.to_string();
        let mut attempt: u32 = 0;

        loop {
            let is_last = attempt >= retries;
            match self.executor.execute(request.clone()).await {
                Ok(response) => {
                    let status = response.status_code();
                    if !(request.retry_statuses && self.policy.is_retryable_status(status)) {
                        return Ok(response);
                    }
                    if is_last {
                        warn!(
                            status,
                            attempts = attempt + 1,
                            "retryable status persisted on final attempt; returning response"
                        );
                        return Ok(response);
                    }
                    debug!(status, attempt = attempt + 1, "retryable status");
                }
                Err(error) if error.is_connection_level() => {
                    if is_last || !self.policy.retry_on_connection_error {
                        return Err(exhausted(url, attempt + 1, error));
                    }
                    debug!(attempt = attempt + 1, error = %error, "connection-level failure");
                }
                Err(error) => return Err(error),
            }

            let delay = self.policy.delay_for(attempt);
            debug!(
                next_attempt = attempt + 2,
                delay_ms = delay.as_millis(),
                "will retry"
            );
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}

fn exhausted(url: String, attempts: u32, last: TransportError) -> TransportError {
    warn!(url = %url, attempts, error = %last, "giving up after connection-level failures");
    if last.is_timeout() {
        TransportError::RequestTimeout { url, attempts }
    } else {
        TransportError::ConnectionExhausted {
            url,
            attempts,
            source: Box::new(last),
        }
    }
}
