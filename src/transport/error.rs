//! Error types for the transport layer.
//!
//! Single-attempt failures (`Connection`, `Timeout`) are what an executor
//! reports. The retrying transport folds them into `ConnectionExhausted` or
//! `RequestTimeout` once the attempt budget is spent.

use thiserror::Error;

/// Boxed source error from an arbitrary executor implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while issuing a request.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection-level failure on a single attempt (DNS, refused, reset).
    #[error("connection error requesting {url}: {source}")]
    Connection {
        /// The URL being requested.
        url: String,
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// A single attempt exceeded its timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Every attempt failed at the connection level.
    #[error("connection failed for {url} after {attempts} attempt(s): {source}")]
    ConnectionExhausted {
        /// The URL being requested.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last single-attempt failure.
        #[source]
        source: Box<TransportError>,
    },

    /// Every attempt failed and the last one timed out.
    #[error("request to {url} timed out after {attempts} attempt(s)")]
    RequestTimeout {
        /// The URL being requested.
        url: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Reading the response body failed after the headers arrived.
    #[error("error reading response body from {url}: {source}")]
    Body {
        /// The URL being read.
        url: String,
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// The URL is malformed or has an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A header name or value cannot be sent over HTTP.
    #[error("invalid header {name}")]
    InvalidHeader {
        /// The offending header name.
        name: String,
    },

    /// Retry policy parameters out of range.
    #[error("invalid retry policy: {reason}")]
    InvalidPolicy {
        /// What was wrong.
        reason: String,
    },

    /// Timeouts must be strictly positive.
    #[error("invalid timeout: {reason}")]
    InvalidTimeout {
        /// What was wrong.
        reason: String,
    },

    /// A request option key that is not recognized.
    #[error("unrecognized request option `{name}`")]
    UnrecognizedOption {
        /// The rejected key.
        name: String,
    },

    /// A recognized request option with a value that does not parse.
    #[error("invalid value for request option `{name}`: {value}")]
    InvalidOptionValue {
        /// The option key.
        name: String,
        /// The rejected value.
        value: String,
    },

    /// The HTTP client could not be built (bad proxy URL, TLS backend failure).
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    /// Creates a single-attempt connection error.
    pub fn connection(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Creates a single-attempt timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a body read error.
    pub fn body(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Body {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid header error.
    pub fn invalid_header(name: impl Into<String>) -> Self {
        Self::InvalidHeader { name: name.into() }
    }

    /// Creates an invalid retry policy error.
    pub fn invalid_policy(reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            reason: reason.into(),
        }
    }

    /// Creates an invalid timeout error.
    pub fn invalid_timeout(reason: impl Into<String>) -> Self {
        Self::InvalidTimeout {
            reason: reason.into(),
        }
    }

    /// Creates an unrecognized option error.
    pub fn unrecognized_option(name: impl Into<String>) -> Self {
        Self::UnrecognizedOption { name: name.into() }
    }

    /// Creates an invalid option value error.
    pub fn invalid_option_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidOptionValue {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns true for single-attempt failures that count against the retry budget.
    #[must_use]
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Returns true if the failure was (or ended with) a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RequestTimeout { .. })
    }

    /// Returns true if the request was rejected before anything was sent.
    #[must_use]
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl { .. }
                | Self::InvalidHeader { .. }
                | Self::InvalidTimeout { .. }
                | Self::InvalidPolicy { .. }
                | Self::UnrecognizedOption { .. }
                | Self::InvalidOptionValue { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_and_timeout_are_connection_level() {
        let conn = TransportError::connection("http://example.test", "refused");
        let timeout = TransportError::timeout("http://example.test");
        assert!(conn.is_connection_level());
        assert!(timeout.is_connection_level());
        assert!(timeout.is_timeout());
        assert!(!conn.is_timeout());
    }

    #[test]
    fn test_exhausted_errors_are_not_connection_level() {
        let exhausted = TransportError::ConnectionExhausted {
            url: "http://example.test".to_string(),
            attempts: 4,
            source: Box::new(TransportError::connection("http://example.test", "reset")),
        };
        assert!(!exhausted.is_connection_level());
        assert!(!TransportError::invalid_url("nope").is_connection_level());
        assert!(!exhausted.is_invalid_request());
        assert!(TransportError::invalid_url("nope").is_invalid_request());
    }

    #[test]
    fn test_exhausted_display_mentions_attempts() {
        let error = TransportError::RequestTimeout {
            url: "http://example.test/slow".to_string(),
            attempts: 3,
        };
        let msg = error.to_string();
        assert!(msg.contains("3 attempt"), "Expected attempt count in: {msg}");
        assert!(msg.contains("http://example.test/slow"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_unrecognized_option_display() {
        let msg = TransportError::unrecognized_option("verify").to_string();
        assert!(msg.contains("`verify`"), "Expected option name in: {msg}");
    }
}
