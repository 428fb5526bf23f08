//! The single-attempt request executor and its reqwest implementation.
//!
//! Everything above this module (retry, session, downloader) only sees the
//! [`RequestExecutor`] trait, so tests and alternative transports can plug in
//! without touching the retry logic.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use reqwest::{Client, ClientBuilder, Method, Proxy, StatusCode};
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::CONNECT_TIMEOUT_SECS;
use super::error::TransportError;

/// Streamed response body.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// A fully merged request, ready to hand to an executor.
///
/// Cloned once per attempt by the retrying transport; the body is a
/// reference-counted [`Bytes`], so clones stay cheap.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// HTTP method.
    pub method: Method,
    /// Target URL, without the query pairs below.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Query pairs appended to the URL.
    pub params: Vec<(String, String)>,
    /// Optional request body.
    pub body: Option<Bytes>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Proxy URL for this request, if any.
    pub proxy: Option<String>,
    /// Return the body as a stream instead of buffering it.
    pub stream: bool,
    /// Whether a retryable status triggers another attempt.
    pub retry_statuses: bool,
}

impl PreparedRequest {
    /// Creates a GET request with no headers, params, or proxy.
    #[must_use]
    pub fn get(url: Url, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            params: Vec::new(),
            body: None,
            timeout,
            proxy: None,
            stream: false,
            retry_statuses: true,
        }
    }

    /// Returns true for methods that are safe to repeat.
    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        !matches!(self.method, Method::POST | Method::PATCH)
    }
}

/// Response body, buffered or streamed depending on the request's stream flag.
pub enum ResponseBody {
    /// Entire body read into memory.
    Buffered(Bytes),
    /// Body still on the wire.
    Stream(ByteStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A response from one executor attempt.
#[derive(Debug)]
pub struct HttpResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Final URL after redirects.
    pub url: Url,
    /// Response body.
    pub body: ResponseBody,
}

impl HttpResponse {
    /// Creates a buffered response; mostly useful for custom executors.
    #[must_use]
    pub fn buffered(status: StatusCode, url: Url, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            url,
            body: ResponseBody::Buffered(body),
        }
    }

    /// Status code as a plain integer.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parses `Content-Length`; malformed or missing values yield `None`.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// Consumes the response and returns the whole body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Body`] if a streamed body fails mid-read.
    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Stream(stream) => {
                let chunks: Vec<Bytes> = stream.try_collect().await?;
                Ok(chunks.concat().into())
            }
        }
    }

    /// Consumes the response and decodes the body as UTF-8, replacing invalid sequences.
    ///
    /// # Errors
    ///
    /// Same as [`bytes`](Self::bytes).
    pub async fn text(self) -> Result<String, TransportError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Turns the body into a stream regardless of how it was received.
    #[must_use]
    pub fn into_stream(self) -> ByteStream {
        match self.body {
            ResponseBody::Stream(stream) => stream,
            ResponseBody::Buffered(bytes) => {
                futures_util::stream::once(async move { Ok(bytes) }).boxed()
            }
        }
    }
}

/// Performs one HTTP attempt.
///
/// Implementations report connection-level problems as
/// [`TransportError::Connection`] or [`TransportError::Timeout`] and must not
/// retry on their own. Any HTTP status, including errors, is a successful
/// attempt from the executor's point of view.
#[async_trait]
pub trait RequestExecutor: Send + Sync + fmt::Debug {
    /// Sends the request and returns the response or a single-attempt failure.
    async fn execute(&self, request: PreparedRequest) -> Result<HttpResponse, TransportError>;
}

/// Client-level settings for [`ReqwestExecutor`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Skip TLS certificate verification. Off unless explicitly requested.
    pub accept_invalid_certs: bool,
    /// Default User-Agent sent when the request does not set one.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            accept_invalid_certs: false,
            user_agent: crate::user_agent::default_user_agent(),
        }
    }
}

/// [`RequestExecutor`] backed by `reqwest`.
///
/// Connection pooling is reqwest's. Requests without a proxy share one client;
/// each distinct proxy URL gets its own client, built lazily and cached.
#[derive(Debug)]
pub struct ReqwestExecutor {
    client: Client,
    proxied: DashMap<String, Client>,
    config: ClientConfig,
}

impl ReqwestExecutor {
    /// Builds an executor from client settings.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] if reqwest cannot build a client.
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        if config.accept_invalid_certs {
            warn!("TLS certificate verification disabled for this executor");
        }
        let client = base_client_builder(&config)
            .build()
            .map_err(|source| TransportError::Client { source })?;
        Ok(Self {
            client,
            proxied: DashMap::new(),
            config,
        })
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let Some(proxy) = proxy else {
            return Ok(self.client.clone());
        };
        if let Some(client) = self.proxied.get(proxy) {
            return Ok(client.clone());
        }
        let resolved = Proxy::all(proxy).map_err(|source| TransportError::Client { source })?;
        let client = base_client_builder(&self.config)
            .proxy(resolved)
            .build()
            .map_err(|source| TransportError::Client { source })?;
        debug!("built client for proxy");
        self.proxied.insert(proxy.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl RequestExecutor for ReqwestExecutor {
    #[instrument(level = "debug", skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: PreparedRequest) -> Result<HttpResponse, TransportError> {
        let client = self.client_for(request.proxy.as_deref())?;
        let url = request.url.to_string();

        let mut target = request.url;
        if !request.params.is_empty() {
            target.query_pairs_mut().extend_pairs(&request.params);
        }
        let mut builder = client
            .request(request.method, target)
            .headers(request.headers);
        if !request.stream {
            builder = builder.timeout(request.timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        // Streamed bodies may take far longer than the timeout in total, so the
        // deadline covers the response head here and each body read below.
        let sent = if request.stream {
            tokio::time::timeout(request.timeout, builder.send())
                .await
                .map_err(|_| TransportError::timeout(url.as_str()))?
        } else {
            builder.send().await
        };
        let response = sent.map_err(|e| map_send_error(&url, e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        debug!(status = status.as_u16(), "response received");

        let body = if request.stream {
            let stream_url = url.clone();
            let stream = response
                .bytes_stream()
                .map_err(move |e| map_body_error(&stream_url, e))
                .boxed();
            ResponseBody::Stream(idle_bounded(stream, request.timeout, url.clone()))
        } else {
            ResponseBody::Buffered(
                response
                    .bytes()
                    .await
                    .map_err(|e| map_body_error(&url, e))?,
            )
        };

        Ok(HttpResponse {
            status,
            headers,
            url: final_url,
            body,
        })
    }
}

/// Fails the stream with [`TransportError::Timeout`] when no chunk arrives
/// within `idle`. The stream ends after that error.
fn idle_bounded(stream: ByteStream, idle: Duration, url: String) -> ByteStream {
    futures_util::stream::unfold(Some(stream), move |state| {
        let url = url.clone();
        async move {
            let mut stream = state?;
            match tokio::time::timeout(idle, stream.next()).await {
                Ok(Some(item)) => Some((item, Some(stream))),
                Ok(None) => None,
                Err(_) => {
                    debug!(url = %url, idle_ms = idle.as_millis(), "body read stalled");
                    Some((Err(TransportError::timeout(url)), None))
                }
            }
        }
    })
    .boxed()
}

fn base_client_builder(config: &ClientConfig) -> ClientBuilder {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .gzip(true)
        .user_agent(config.user_agent.clone())
        .danger_accept_invalid_certs(config.accept_invalid_certs)
}

fn map_send_error(url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::timeout(url)
    } else if error.is_builder() {
        TransportError::invalid_url(url)
    } else {
        TransportError::connection(url, error)
    }
}

fn map_body_error(url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::timeout(url)
    } else {
        TransportError::body(url, error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_post_and_patch_are_not_idempotent() {
        let mut request = PreparedRequest::get(url("http://example.test/"), Duration::from_secs(1));
        assert!(request.is_idempotent());
        request.method = Method::HEAD;
        assert!(request.is_idempotent());
        request.method = Method::PUT;
        assert!(request.is_idempotent());
        request.method = Method::POST;
        assert!(!request.is_idempotent());
        request.method = Method::PATCH;
        assert!(!request.is_idempotent());
    }

    #[test]
    fn test_content_length_parses_and_degrades() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("4096"));
        let response = HttpResponse::buffered(
            StatusCode::OK,
            url("http://example.test/a"),
            headers,
            Bytes::new(),
        );
        assert_eq!(response.content_length(), Some(4096));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        let response = HttpResponse::buffered(
            StatusCode::OK,
            url("http://example.test/a"),
            headers,
            Bytes::new(),
        );
        assert_eq!(response.content_length(), None);
    }

    #[tokio::test]
    async fn test_streamed_body_collects_to_bytes() {
        let chunks = vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let response = HttpResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            url: url("http://example.test/s"),
            body: ResponseBody::Stream(futures_util::stream::iter(chunks).boxed()),
        };
        assert_eq!(response.text().await.unwrap(), "abcd");
    }

    #[tokio::test]
    async fn test_text_replaces_invalid_utf8() {
        let response = HttpResponse::buffered(
            StatusCode::OK,
            url("http://example.test/t"),
            HeaderMap::new(),
            Bytes::from_static(b"ok\xff"),
        );
        assert_eq!(response.text().await.unwrap(), "ok\u{fffd}");
    }

    #[tokio::test]
    async fn test_slow_stream_survives_while_chunks_keep_coming() {
        let chunks = futures_util::stream::iter(0..4u8)
            .then(|i| async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(Bytes::from(vec![i; 10]))
            })
            .boxed();
        let bounded = idle_bounded(chunks, Duration::from_millis(200), "http://example.test/slow".into());

        let collected: Vec<Bytes> = bounded.try_collect().await.unwrap();

        assert_eq!(collected.len(), 4);
        assert_eq!(collected.iter().map(Bytes::len).sum::<usize>(), 40);
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out_once() {
        let stalled = futures_util::stream::once(async { Ok(Bytes::from_static(b"head")) })
            .chain(futures_util::stream::pending())
            .boxed();
        let mut bounded = idle_bounded(stalled, Duration::from_millis(50), "http://example.test/stall".into());

        assert_eq!(bounded.next().await.unwrap().unwrap(), Bytes::from_static(b"head"));
        assert!(matches!(
            bounded.next().await,
            Some(Err(TransportError::Timeout { .. }))
        ));
        assert!(bounded.next().await.is_none());
    }

    #[test]
    fn test_executor_builds_with_default_config() {
        let executor = ReqwestExecutor::new(ClientConfig::default()).unwrap();
        assert!(!executor.config.accept_invalid_certs);
        assert!(executor.proxied.is_empty());
    }

    #[test]
    fn test_executor_caches_proxy_clients() {
        let executor = ReqwestExecutor::new(ClientConfig::default()).unwrap();
        executor.client_for(Some("http://127.0.0.1:3128")).unwrap();
        executor.client_for(Some("http://127.0.0.1:3128")).unwrap();
        assert_eq!(executor.proxied.len(), 1);
    }

    #[test]
    fn test_executor_rejects_malformed_proxy() {
        let executor = ReqwestExecutor::new(ClientConfig::default()).unwrap();
        let result = executor.client_for(Some("::not a proxy::"));
        assert!(matches!(result, Err(TransportError::Client { .. })));
    }
}
