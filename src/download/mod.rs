//! Resumable file downloads with chunked progress reporting.
//!
//! A download probes the declared size with HEAD, continues from the bytes
//! already on disk with a `Range` request, writes in 1 KiB chunks and checks
//! the final size.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use spider_core::{DownloadProgress, Session, SessionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(SessionConfig::default())?;
//! let print = |p: DownloadProgress| println!("{} / {}", p.bytes_downloaded, p.total_bytes);
//! let report = session
//!     .download(
//!         "https://example.com/archive.zip",
//!         Path::new("archive.zip"),
//!         true,
//!         Some(&print),
//!     )
//!     .await?;
//! println!("{} bytes on disk", report.bytes_on_disk);
//! # Ok(())
//! # }
//! ```

mod error;
mod progress;
mod resumable;

pub use error::DownloadError;
pub use progress::{DownloadProgress, ProgressSink};
pub use resumable::{CHUNK_SIZE, DownloadReport, DownloadState, DownloadTask, Downloader};

// Note: no module-local Result aliases. Use `Result<T, DownloadError>`
// explicitly in signatures.
