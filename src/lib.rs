//! Spider Core Library
//!
//! Building blocks for scripted web retrieval: a retrying HTTP transport, a
//! stateful session carrying default headers, cookies, params and proxy,
//! resumable file downloads and fetch-and-save for pages.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`transport`] - Backoff policy, request executor and retrying transport
//! - [`session`] - Session state and request merging
//! - [`download`] - Resumable downloads with progress reporting
//! - [`page`] - Fetch a page and persist it under a derived file name
//! - [`config`] - TOML file configuration for session defaults
//! - [`utils`] - Cookie/query string parsing and polite pauses
//! - [`user_agent`] - Default and rotating User-Agent strings

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod page;
pub mod session;
#[cfg(test)]
pub(crate) mod test_support;
pub mod transport;
pub mod user_agent;
pub mod utils;

// Re-export commonly used types
pub use config::{ConfigError, FileConfig};
pub use download::{
    CHUNK_SIZE, DownloadError, DownloadProgress, DownloadReport, DownloadState, DownloadTask,
    Downloader, ProgressSink,
};
pub use page::{PageError, fetch_and_save};
pub use session::{FetchResult, Session, SessionConfig, SessionState};
pub use transport::{
    HttpResponse, RequestExecutor, RequestOptions, RetryPolicy, RetryingTransport, TransportError,
};
