//! Error types for the download module.

use std::path::PathBuf;

use thiserror::Error;

use crate::transport::TransportError;

/// Errors that can occur during a resumable download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The request could not be completed (after retries).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered the content request with a non-success status.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL being downloaded.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// A partial response started somewhere other than the requested offset.
    /// Nothing was written.
    #[error("range response for {url} starts at byte {received}, expected {requested}")]
    RangeMismatch {
        /// The URL being downloaded.
        url: String,
        /// Offset sent in the `Range` header.
        requested: u64,
        /// Offset named by `Content-Range`.
        received: u64,
    },

    /// File system error (open, write, flush, stat). Never retried.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Final size on disk differs from the size the server declared.
    #[error(
        "download incomplete for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Incomplete {
        /// Destination path.
        path: PathBuf,
        /// Declared size in bytes.
        expected_bytes: u64,
        /// Size on disk in bytes.
        actual_bytes: u64,
        /// Whether the partial file was kept for a later resume.
        retained: bool,
    },
}

impl DownloadError {
    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a range mismatch error.
    pub fn range_mismatch(url: impl Into<String>, requested: u64, received: u64) -> Self {
        Self::RangeMismatch {
            url: url.into(),
            requested,
            received,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a size mismatch error.
    pub fn incomplete(
        path: impl Into<PathBuf>,
        expected_bytes: u64,
        actual_bytes: u64,
        retained: bool,
    ) -> Self {
        Self::Incomplete {
            path: path.into(),
            expected_bytes,
            actual_bytes,
            retained,
        }
    }
}

// No `From<std::io::Error>`: the IO variant needs the path for context, so
// callers go through `DownloadError::io`.
