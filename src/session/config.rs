//! Construction-time settings for a [`Session`](super::Session).

use std::time::Duration;

use crate::transport::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS};
use crate::transport::{ClientConfig, RetryPolicy, TransportError};

/// Settings fixed when a session is created.
///
/// Everything here is owned by the session built from it; nothing is
/// process-wide. TLS verification stays on unless
/// [`danger_accept_invalid_certs`](Self::danger_accept_invalid_certs) is called.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub(crate) timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) retry_non_idempotent: bool,
    pub(crate) accept_invalid_certs: bool,
    pub(crate) user_agent: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            retry_policy: RetryPolicy::default(),
            retry_non_idempotent: false,
            accept_invalid_certs: false,
            user_agent: None,
        }
    }
}

impl SessionConfig {
    /// Creates the default configuration (5s timeout, default retry policy).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default per-attempt timeout for requests.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// TCP connect timeout for the underlying client.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Retry policy owned by the session.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Lets POST and PATCH requests use the retry policy too.
    #[must_use]
    pub fn retry_non_idempotent(mut self, enabled: bool) -> Self {
        self.retry_non_idempotent = enabled;
        self
    }

    /// Disables TLS certificate verification for this session only.
    ///
    /// Intended for development against self-signed hosts.
    #[must_use]
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Overrides the default User-Agent.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), TransportError> {
        if self.timeout.is_zero() {
            return Err(TransportError::invalid_timeout("timeout must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(TransportError::invalid_timeout(
                "connect timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    pub(crate) fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: self.connect_timeout,
            accept_invalid_certs: self.accept_invalid_certs,
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(crate::user_agent::default_user_agent),
        }
    }
}
