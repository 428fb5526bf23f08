//! Request execution with automatic retry and backoff.
//!
//! This module provides the layer every other part of the crate sends
//! requests through.
//!
//! # Features
//!
//! - A narrow [`RequestExecutor`] contract (one attempt, no retries)
//! - A reqwest-backed executor with per-proxy client caching
//! - [`RetryingTransport`]: retry on connection failures and on configured
//!   status codes, with exponential backoff between attempts
//! - Typed per-call [`RequestOptions`] instead of free-form keyword passthrough
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use spider_core::transport::{
//!     ClientConfig, PreparedRequest, ReqwestExecutor, RetryPolicy, RetryingTransport,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = Arc::new(ReqwestExecutor::new(ClientConfig::default())?);
//! let transport = RetryingTransport::new(executor, RetryPolicy::default());
//! let url = url::Url::parse("https://example.com/")?;
//! let response = transport
//!     .execute(PreparedRequest::get(url, Duration::from_secs(5)))
//!     .await?;
//! println!("status: {}", response.status_code());
//! # Ok(())
//! # }
//! ```

pub mod constants;
mod error;
mod executor;
mod options;
mod retry;

pub use constants::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_RETRIES, DEFAULT_RETRYABLE_STATUSES, DEFAULT_TIMEOUT_SECS,
};
pub use error::{BoxError, TransportError};
pub use executor::{
    ByteStream, ClientConfig, HttpResponse, PreparedRequest, ReqwestExecutor, RequestExecutor,
    ResponseBody,
};
pub use options::RequestOptions;
pub use retry::{RetryPolicy, RetryingTransport, Sleeper, TokioSleeper};
