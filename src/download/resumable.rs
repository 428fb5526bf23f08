//! Resumable, progress-tracked file downloads over a [`Session`].

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_RANGE, RANGE};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use super::error::DownloadError;
use super::progress::{DownloadProgress, GuardedSink, ProgressSink};
use crate::session::Session;
use crate::transport::{HttpResponse, RequestOptions};

/// Bytes written (and reported) per chunk: 1 KiB.
pub const CHUNK_SIZE: usize = 1024;

/// Lifecycle of one download call.
///
/// ```text
/// NotStarted -> Probing -> Complete
///                       -> Streaming -> Verified | Incomplete
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// Nothing done yet.
    NotStarted,
    /// Asking the server for the declared size.
    Probing,
    /// The file on disk already covers the declared size; nothing fetched.
    Complete,
    /// Receiving bytes.
    Streaming,
    /// Finished and the size matches (or no size was declared).
    Verified,
    /// Finished with a size mismatch.
    Incomplete,
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotStarted => "not-started",
            Self::Probing => "probing",
            Self::Complete => "complete",
            Self::Streaming => "streaming",
            Self::Verified => "verified",
            Self::Incomplete => "incomplete",
        };
        f.write_str(label)
    }
}

/// What to download and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Source URL.
    pub source_url: String,
    /// Destination file.
    pub destination: PathBuf,
    /// Continue from the bytes already on disk.
    pub resume: bool,
}

impl DownloadTask {
    /// Creates a task.
    pub fn new(source_url: impl Into<String>, destination: impl Into<PathBuf>, resume: bool) -> Self {
        Self {
            source_url: source_url.into(),
            destination: destination.into(),
            resume,
        }
    }
}

/// Result of a successful download call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// Destination file.
    pub path: PathBuf,
    /// File size after the call.
    pub bytes_on_disk: u64,
    /// Bytes received during this call.
    pub bytes_streamed: u64,
    /// Declared size, when the server gave one.
    pub total_bytes: Option<u64>,
    /// Terminal state: [`DownloadState::Complete`] or [`DownloadState::Verified`].
    pub state: DownloadState,
    /// The server did not honor the range request and the file was rewritten from zero.
    pub range_restarted: bool,
}

/// Downloads files through a session, resuming partial files when asked.
///
/// The destination is held open exclusively for the duration of a call;
/// concurrent downloads to the same path must be serialized by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Downloader<'a> {
    session: &'a Session,
}

impl<'a> Downloader<'a> {
    /// Creates a downloader sending requests through `session`.
    #[must_use]
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Downloads `url` to `destination`.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        resume: bool,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<DownloadReport, DownloadError> {
        self.run(&DownloadTask::new(url, destination, resume), progress)
            .await
    }

    /// Runs a download task.
    ///
    /// 1. HEAD for the declared size (missing or malformed -> unknown).
    /// 2. With `resume`, an existing file that already covers the size
    ///    completes immediately.
    /// 3. Otherwise GET with `Range: bytes=<start>-` from the existing length,
    ///    appending in [`CHUNK_SIZE`] chunks. A server that answers 200 to a
    ///    range request, or 206 from byte zero, is detected and the file is
    ///    rewritten from zero.
    /// 4. The final size is checked against the declared size.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Transport`] when requests fail after retries.
    /// - [`DownloadError::HttpStatus`] for a non-success content response.
    /// - [`DownloadError::RangeMismatch`] when a partial response starts at an
    ///   offset other than the one requested (or zero).
    /// - [`DownloadError::Io`] for file system failures.
    /// - [`DownloadError::Incomplete`] when the size does not match; the
    ///   partial file is removed only for non-resumable tasks.
    #[instrument(skip(self, task, progress), fields(url = %task.source_url, dest = %task.destination.display(), resume = task.resume))]
    pub async fn run(
        &self,
        task: &DownloadTask,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<DownloadReport, DownloadError> {
        let url = task.source_url.as_str();
        let path = task.destination.as_path();
        let mut state = DownloadState::NotStarted;

        advance(&mut state, DownloadState::Probing);
        let declared = self.probe_total(url).await?;
        let existing = if task.resume {
            existing_len(path).await?
        } else {
            0
        };

        if let Some(total) = declared
            && existing >= total
        {
            if total == 0 {
                open_for_append(path, !task.resume).await?;
            }
            advance(&mut state, DownloadState::Complete);
            info!(bytes = existing, "already complete; nothing to fetch");
            return Ok(DownloadReport {
                path: path.to_path_buf(),
                bytes_on_disk: existing,
                bytes_streamed: 0,
                total_bytes: declared,
                state,
                range_restarted: false,
            });
        }

        let mut options = RequestOptions::new()
            .stream()
            .header(ACCEPT_ENCODING.as_str(), "identity");
        if existing > 0 {
            options = options.header(RANGE.as_str(), range_header(existing, declared));
        }
        let response = self.session.get(url, options).await?;
        let status = response.status_code();

        let (offset, range_restarted) = match status {
            206 if existing > 0 => match content_range_start(&response) {
                Some(0) => {
                    warn!(existing, "partial response starts at zero; restarting from zero");
                    (0, true)
                }
                Some(start) if start != existing => {
                    return Err(DownloadError::range_mismatch(url, existing, start));
                }
                _ => (existing, false),
            },
            416 if existing > 0 && declared.is_none() => {
                advance(&mut state, DownloadState::Complete);
                info!(bytes = existing, "server reports range past end; treating as complete");
                return Ok(DownloadReport {
                    path: path.to_path_buf(),
                    bytes_on_disk: existing,
                    bytes_streamed: 0,
                    total_bytes: Some(existing),
                    state,
                    range_restarted: false,
                });
            }
            s if (200..300).contains(&s) => {
                if existing > 0 {
                    warn!(status = s, existing, "server ignored range request; restarting from zero");
                }
                (0, existing > 0)
            }
            s => return Err(DownloadError::http_status(url, s)),
        };
        let total = declared.or_else(|| declared_total(&response, offset));

        advance(&mut state, DownloadState::Streaming);
        let file = open_for_append(path, offset == 0).await?;
        let mut sink = GuardedSink::new(progress);
        let streamed = match stream_to_file(file, response, path, offset, total, &mut sink).await {
            Ok(streamed) => streamed,
            Err(error) => {
                if !task.resume {
                    debug!(path = %path.display(), "cleaning up partial file after error");
                    let _ = tokio::fs::remove_file(path).await;
                }
                return Err(error);
            }
        };

        let on_disk = existing_len(path).await?;
        if let Some(expected) = total
            && expected != on_disk
        {
            advance(&mut state, DownloadState::Incomplete);
            if !task.resume {
                debug!(path = %path.display(), "removing incomplete non-resumable download");
                let _ = tokio::fs::remove_file(path).await;
            }
            return Err(DownloadError::incomplete(path, expected, on_disk, task.resume));
        }

        advance(&mut state, DownloadState::Verified);
        info!(
            bytes = on_disk,
            streamed,
            resumed = offset > 0,
            range_restarted,
            "download complete"
        );
        Ok(DownloadReport {
            path: path.to_path_buf(),
            bytes_on_disk: on_disk,
            bytes_streamed: streamed,
            total_bytes: total,
            state,
            range_restarted,
        })
    }

    async fn probe_total(&self, url: &str) -> Result<Option<u64>, DownloadError> {
        let response = self
            .session
            .head(
                url,
                RequestOptions::new()
                    .header(ACCEPT_ENCODING.as_str(), "identity")
                    .without_status_retries(),
            )
            .await?;
        if !response.status.is_success() {
            debug!(status = response.status_code(), "size probe failed; size unknown");
            return Ok(None);
        }
        let total = response.content_length();
        debug!(?total, "size probe finished");
        Ok(total)
    }
}

impl Session {
    /// Downloads `url` to `destination` through this session.
    ///
    /// # Errors
    ///
    /// See [`Downloader::run`].
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        resume: bool,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<DownloadReport, DownloadError> {
        Downloader::new(self)
            .download(url, destination, resume, progress)
            .await
    }
}

fn advance(state: &mut DownloadState, next: DownloadState) {
    debug!(from = %state, to = %next, "download state");
    *state = next;
}

fn range_header(start: u64, total: Option<u64>) -> String {
    match total {
        Some(total) if total > start => format!("bytes={start}-{}", total - 1),
        _ => format!("bytes={start}-"),
    }
}

/// First byte offset of a `Content-Range: bytes <start>-<end>/<total>` header.
fn content_range_start(response: &HttpResponse) -> Option<u64> {
    response
        .header(CONTENT_RANGE.as_str())?
        .trim()
        .strip_prefix("bytes ")?
        .split_once('-')
        .and_then(|(start, _)| start.trim().parse::<u64>().ok())
}

/// Size the content response implies for the whole file.
fn declared_total(response: &HttpResponse, offset: u64) -> Option<u64> {
    if offset > 0 {
        let from_range = response
            .header(CONTENT_RANGE.as_str())
            .and_then(|v| v.rsplit_once('/'))
            .and_then(|(_, total)| total.trim().parse::<u64>().ok());
        from_range.or_else(|| {
            response
                .content_length()
                .map(|remaining| offset.saturating_add(remaining))
        })
    } else {
        response.content_length()
    }
}

async fn existing_len(path: &Path) -> Result<u64, DownloadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(DownloadError::io(path, e)),
    }
}

async fn open_for_append(path: &Path, truncate: bool) -> Result<File, DownloadError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    if truncate {
        file.set_len(0)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
    }
    Ok(file)
}

/// Streams the response body to `file` in [`CHUNK_SIZE`] pieces, returning
/// bytes written.
///
/// Whatever was received is flushed to disk even when the stream fails, so a
/// later resume can pick up from it.
async fn stream_to_file(
    file: File,
    response: HttpResponse,
    path: &Path,
    offset: u64,
    total: Option<u64>,
    sink: &mut GuardedSink<'_>,
) -> Result<u64, DownloadError> {
    let total_bytes = total.map_or(-1, |t| i64::try_from(t).unwrap_or(i64::MAX));
    let mut writer = BufWriter::new(file);
    let mut stream = response.into_stream();
    let mut pending = BytesMut::with_capacity(CHUNK_SIZE);
    let mut written: u64 = 0;

    let mut outcome: Result<(), DownloadError> = Ok(());
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => pending.extend_from_slice(&chunk),
            Err(error) => {
                outcome = Err(error.into());
                break;
            }
        }
        while pending.len() >= CHUNK_SIZE {
            let piece = pending.split_to(CHUNK_SIZE);
            written += write_chunk(&mut writer, &piece, path).await?;
            sink.report(DownloadProgress {
                bytes_downloaded: offset + written,
                total_bytes,
            });
        }
    }
    if !pending.is_empty() {
        written += write_chunk(&mut writer, &pending, path).await?;
        sink.report(DownloadProgress {
            bytes_downloaded: offset + written,
            total_bytes,
        });
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    outcome.map(|()| written)
}

async fn write_chunk(
    writer: &mut BufWriter<File>,
    chunk: &[u8],
    path: &Path,
) -> Result<u64, DownloadError> {
    writer
        .write_all(chunk)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    Ok(chunk.len() as u64)
}
