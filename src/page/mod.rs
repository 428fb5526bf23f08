//! Fetch a page and persist its text to disk.
//!
//! A non-200 answer or a network failure is not an error here: it is logged
//! and reported as `Ok(None)`, so a crawl loop can move on to the next URL.

mod filename;

use std::path::{Path, PathBuf};

use reqwest::header::CONTENT_DISPOSITION;
use thiserror::Error;
use tracing::{info, instrument, warn};

pub use filename::{FALLBACK_FILE_NAME, sanitize_file_name};

use crate::session::{FetchResult, Session};
use crate::transport::{RequestOptions, TransportError};

/// Errors from [`fetch_and_save`].
#[derive(Debug, Error)]
pub enum PageError {
    /// The request could not be built (bad URL, header or option).
    #[error(transparent)]
    Transport(TransportError),

    /// Writing the output file failed.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// Output path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl PageError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// GETs `url` through `session` and writes the body as UTF-8 text under
/// `output_dir`.
///
/// The file name is `file_name` when given, else the last URL path segment,
/// else the `Content-Disposition` filename, else `index.html`. Reserved
/// characters are replaced with `-`. Existing files are overwritten.
///
/// Returns the written path, or `None` when the server did not answer 200 or
/// could not be reached.
///
/// # Errors
///
/// [`PageError::Transport`] for a request that cannot be built and
/// [`PageError::Io`] when the file cannot be written.
#[instrument(skip(session, output_dir), fields(url = %url))]
pub async fn fetch_and_save(
    session: &Session,
    url: &str,
    file_name: Option<&str>,
    output_dir: &Path,
) -> Result<Option<PathBuf>, PageError> {
    let response = match session.fetch(url, RequestOptions::new()).await {
        FetchResult::Success(response) => response,
        FetchResult::NoResult { status } => {
            warn!(status, "page not saved: server did not answer 200");
            return Ok(None);
        }
        FetchResult::Failed(error) if error.is_invalid_request() => {
            return Err(PageError::Transport(error));
        }
        FetchResult::Failed(error) => {
            warn!(error = %error, "page not saved: request failed");
            return Ok(None);
        }
    };

    let name = filename::resolve_file_name(
        file_name,
        url,
        response.header(CONTENT_DISPOSITION.as_str()),
    );
    let text = match response.text().await {
        Ok(text) => text,
        Err(error) => {
            warn!(error = %error, "page not saved: body could not be read");
            return Ok(None);
        }
    };

    let path = output_dir.join(name);
    tokio::fs::write(&path, text.as_bytes())
        .await
        .map_err(|e| PageError::io(&path, e))?;
    info!(path = %path.display(), bytes = text.len(), "page saved");
    Ok(Some(path))
}
