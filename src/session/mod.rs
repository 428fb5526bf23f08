//! Reusable client session: default headers, cookies, query params, proxy and
//! timeout carried across requests.
//!
//! Setters take `Option`: `Some` merges (upserts) into the current values,
//! `None` clears them all.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use spider_core::{RequestOptions, Session, SessionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::new(SessionConfig::default())?;
//! session.set_headers(Some(&BTreeMap::from([(
//!     "User-Agent".to_string(),
//!     "headers/2020".to_string(),
//! )])));
//! let response = session
//!     .get("http://httpbin.org/get", RequestOptions::new().param("2", "222"))
//!     .await?;
//! println!("{}", response.text().await?);
//! println!("{session}");
//! # Ok(())
//! # }
//! ```

mod config;
mod headers;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::COOKIE;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use url::Url;

pub use config::SessionConfig;
use headers::{HeaderTable, insert_header};

use crate::transport::{
    HttpResponse, PreparedRequest, ReqwestExecutor, RequestExecutor, RequestOptions, RetryPolicy,
    RetryingTransport, Sleeper, TransportError,
};

/// Mutable default request state owned by one [`Session`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    headers: HeaderTable,
    cookies: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    proxy: Option<String>,
    timeout: Duration,
}

impl SessionState {
    fn new(timeout: Duration) -> Self {
        Self {
            headers: HeaderTable::default(),
            cookies: BTreeMap::new(),
            params: BTreeMap::new(),
            proxy: None,
            timeout,
        }
    }

    /// Default headers, keyed by the spelling last used to set them.
    #[must_use]
    pub fn headers(&self) -> BTreeMap<String, String> {
        self.headers.to_map()
    }

    /// Default cookies.
    #[must_use]
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Default query parameters.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Proxy URL, if set.
    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Default per-attempt timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Outcome of [`Session::fetch`].
///
/// Only a 200 response counts as `Success`; any other status is `NoResult`
/// and transport failures are `Failed`. Callers match on it instead of
/// catching errors.
#[derive(Debug)]
#[must_use]
pub enum FetchResult {
    /// The server answered 200.
    Success(HttpResponse),
    /// The server answered with another status.
    NoResult {
        /// The status received.
        status: u16,
    },
    /// The request could not be completed.
    Failed(TransportError),
}

impl FetchResult {
    /// Returns true for [`FetchResult::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The response when successful.
    #[must_use]
    pub fn into_response(self) -> Option<HttpResponse> {
        match self {
            Self::Success(response) => Some(response),
            Self::NoResult { .. } | Self::Failed(_) => None,
        }
    }
}

/// A client session issuing requests through a [`RetryingTransport`].
///
/// Mutators take `&mut self`; request methods take `&self`, so one session
/// can serve several concurrent requests once configured.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    transport: RetryingTransport,
}

impl Session {
    /// Creates a session backed by a reqwest client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidTimeout`] for a zero timeout and
    /// [`TransportError::Client`] if the HTTP client cannot be built.
    pub fn new(config: SessionConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let executor = Arc::new(ReqwestExecutor::new(config.client_config())?);
        Self::with_executor(config, executor)
    }

    /// Creates a session on top of a caller-supplied executor.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidTimeout`] for a zero timeout.
    pub fn with_executor(
        config: SessionConfig,
        executor: Arc<dyn RequestExecutor>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let transport = RetryingTransport::new(executor, config.retry_policy.clone())
            .retry_non_idempotent(config.retry_non_idempotent);
        Ok(Self {
            state: SessionState::new(config.timeout),
            transport,
        })
    }

    /// Replaces the backoff wait implementation.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.transport = self.transport.with_sleeper(sleeper);
        self
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Retry policy owned by this session.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        self.transport.policy()
    }

    /// Merges headers into the defaults, or clears them all with `None`.
    ///
    /// Names are case-insensitive.
    pub fn set_headers(&mut self, headers: Option<&BTreeMap<String, String>>) {
        match headers {
            Some(headers) => {
                for (name, value) in headers {
                    self.state.headers.upsert(name, value);
                }
            }
            None => self.state.headers.clear(),
        }
    }

    /// Default headers.
    #[must_use]
    pub fn headers(&self) -> BTreeMap<String, String> {
        self.state.headers()
    }

    /// Merges cookies into the defaults, or clears them all with `None`.
    pub fn set_cookies(&mut self, cookies: Option<&BTreeMap<String, String>>) {
        merge_or_clear(&mut self.state.cookies, cookies);
    }

    /// Default cookies.
    #[must_use]
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.state.cookies
    }

    /// Merges query params into the defaults, or clears them all with `None`.
    pub fn set_params(&mut self, params: Option<&BTreeMap<String, String>>) {
        merge_or_clear(&mut self.state.params, params);
    }

    /// Default query params.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.state.params
    }

    /// Sets the proxy for HTTP and HTTPS (`http://`, `https://` or `socks5://`),
    /// or clears it with `None`.
    pub fn set_proxy(&mut self, proxy: Option<&str>) {
        self.state.proxy = proxy.map(str::to_string);
    }

    /// Proxy URL, if set.
    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.state.proxy()
    }

    /// Changes the default per-attempt timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidTimeout`] for a zero duration.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        if timeout.is_zero() {
            return Err(TransportError::invalid_timeout("timeout must be greater than zero"));
        }
        self.state.timeout = timeout;
        Ok(())
    }

    /// Default per-attempt timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.state.timeout
    }

    /// Merges session defaults with per-call options into a wire request.
    ///
    /// Per-call params, headers, proxy and timeout win over session values.
    /// Session cookies become a `Cookie` header unless the call sets one.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidUrl`] for an unparsable or non-HTTP URL,
    /// [`TransportError::InvalidHeader`] for an unsendable header, and
    /// [`TransportError::InvalidTimeout`] for a zero per-call timeout.
    pub fn prepare(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<PreparedRequest, TransportError> {
        let parsed = Url::parse(url).map_err(|_| TransportError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TransportError::invalid_url(url));
        }

        let mut params = self.state.params.clone();
        params.extend(options.params);

        let mut headers = self.state.headers.to_header_map()?;
        let caller_sets_cookie = options
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case(COOKIE.as_str()));
        if !self.state.cookies.is_empty() && !caller_sets_cookie {
            insert_header(&mut headers, COOKIE.as_str(), &cookie_header(&self.state.cookies))?;
        }
        for (name, value) in &options.headers {
            insert_header(&mut headers, name, value)?;
        }

        let timeout = options.timeout.unwrap_or(self.state.timeout);
        if timeout.is_zero() {
            return Err(TransportError::invalid_timeout("timeout must be greater than zero"));
        }

        Ok(PreparedRequest {
            method,
            url: parsed,
            headers,
            params: params.into_iter().collect(),
            body: options.body,
            timeout,
            proxy: options.proxy.or_else(|| self.state.proxy.clone()),
            stream: options.stream,
            retry_statuses: !options.no_status_retries,
        })
    }

    /// Sends a request with any method through the retrying transport.
    ///
    /// # Errors
    ///
    /// See [`prepare`](Self::prepare) and [`RetryingTransport::execute`].
    #[instrument(skip(self, options), fields(method = %method, url = %url))]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        let request = self.prepare(method, url, options)?;
        let response = self.transport.execute(request).await?;
        debug!(status = response.status_code(), "request finished");
        Ok(response)
    }

    /// Sends a GET request.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn get(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.request(Method::GET, url, options).await
    }

    /// Sends a HEAD request.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn head(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.request(Method::HEAD, url, options).await
    }

    /// Sends a POST request. Retried only when the session opted in.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn post(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.request(Method::POST, url, options).await
    }

    /// GETs `url` and classifies the outcome without raising.
    #[instrument(skip(self, options), fields(url = %url))]
    pub async fn fetch(&self, url: &str, options: RequestOptions) -> FetchResult {
        match self.get(url, options).await {
            Ok(response) if response.status_code() == 200 => FetchResult::Success(response),
            Ok(response) => {
                let status = response.status_code();
                debug!(status, "fetch returned no result");
                FetchResult::NoResult { status }
            }
            Err(error) => {
                warn!(error = %error, "fetch failed");
                FetchResult::Failed(error)
            }
        }
    }

    /// Renders timeout, headers, cookies and params for diagnostics.
    ///
    /// Maps are printed as JSON with sorted keys, `{}` when empty.
    #[must_use]
    pub fn describe(&self) -> String {
        let banner = "<------------------------------ Session ------------------------------>";
        [
            banner.to_string(),
            format!("timeout = {}", self.state.timeout.as_secs_f64()),
            format!("headers = {}", pretty_map(&self.state.headers())),
            format!("cookies = {}", pretty_map(&self.state.cookies)),
            format!("params = {}", pretty_map(&self.state.params)),
            banner.to_string(),
        ]
        .join("\n")
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

fn merge_or_clear(target: &mut BTreeMap<String, String>, source: Option<&BTreeMap<String, String>>) {
    match source {
        Some(source) => target.extend(source.iter().map(|(k, v)| (k.clone(), v.clone()))),
        None => target.clear(),
    }
}

fn cookie_header(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn pretty_map(map: &BTreeMap<String, String>) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    if map.serialize(&mut serializer).is_err() {
        return format!("{map:?}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
