//! Typed per-call request options.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;

use super::error::TransportError;

/// Per-call overrides for a session request.
///
/// Only the fields below exist; string-keyed input goes through
/// [`RequestOptions::set`], which rejects anything else.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Per-attempt timeout; falls back to the session timeout.
    pub timeout: Option<Duration>,
    /// Extra headers; win over session headers on collision.
    pub headers: BTreeMap<String, String>,
    /// Extra query parameters; win over session params on collision.
    pub params: BTreeMap<String, String>,
    /// Proxy URL; falls back to the session proxy.
    pub proxy: Option<String>,
    /// Return the body as a stream.
    pub stream: bool,
    /// Request body.
    pub body: Option<Bytes>,
    /// Return the first response even when its status is retryable.
    /// Connection failures still follow the retry policy.
    pub no_status_retries: bool,
}

impl RequestOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Routes the request through a proxy.
    #[must_use]
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Requests a streamed body.
    #[must_use]
    pub fn stream(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Disables retries on retryable statuses for this call.
    #[must_use]
    pub fn without_status_retries(mut self) -> Self {
        self.no_status_retries = true;
        self
    }

    /// Applies one `key=value` style option.
    ///
    /// Recognized keys: `timeout` (seconds), `proxy`, `stream` (bool), `body`,
    /// `headers.<name>` and `params.<name>`.
    ///
    /// # Errors
    ///
    /// [`TransportError::UnrecognizedOption`] for any other key, and
    /// [`TransportError::InvalidOptionValue`] when a value does not parse.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), TransportError> {
        if let Some(name) = key.strip_prefix("headers.").filter(|n| !n.is_empty()) {
            self.headers.insert(name.to_string(), value.to_string());
            return Ok(());
        }
        if let Some(name) = key.strip_prefix("params.").filter(|n| !n.is_empty()) {
            self.params.insert(name.to_string(), value.to_string());
            return Ok(());
        }

        match key {
            "timeout" => {
                let secs = value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|s| s.is_finite() && *s > 0.0)
                    .ok_or_else(|| TransportError::invalid_option_value(key, value))?;
                self.timeout = Some(Duration::from_secs_f64(secs));
            }
            "proxy" => self.proxy = Some(value.to_string()),
            "stream" => {
                self.stream = match value.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => true,
                    "false" | "0" | "no" => false,
                    _ => return Err(TransportError::invalid_option_value(key, value)),
                };
            }
            "body" => self.body = Some(Bytes::from(value.to_string())),
            other => return Err(TransportError::unrecognized_option(other)),
        }
        Ok(())
    }

    /// Builds options from `key=value` strings.
    ///
    /// # Errors
    ///
    /// Same as [`set`](Self::set); a string without `=` is an invalid value.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, TransportError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::default();
        for pair in pairs {
            let pair = pair.as_ref();
            let Some((key, value)) = pair.split_once('=') else {
                return Err(TransportError::invalid_option_value(pair, ""));
            };
            options.set(key.trim(), value)?;
        }
        Ok(options)
    }
}
