//! Progress reporting for downloads.

use std::panic::{AssertUnwindSafe, catch_unwind};

use indicatif::ProgressBar;
use tracing::warn;

/// Cumulative download progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes on disk so far, including any resumed prefix.
    pub bytes_downloaded: u64,
    /// Declared total size, or -1 when unknown.
    pub total_bytes: i64,
}

impl DownloadProgress {
    /// Total as an `Option`.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        u64::try_from(self.total_bytes).ok()
    }
}

/// Receives progress after each chunk.
///
/// Implementations should return quickly; they run on the download task.
pub trait ProgressSink: Send + Sync {
    /// Called with cumulative progress.
    fn on_progress(&self, progress: DownloadProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(DownloadProgress) + Send + Sync,
{
    fn on_progress(&self, progress: DownloadProgress) {
        self(progress);
    }
}

impl ProgressSink for ProgressBar {
    fn on_progress(&self, progress: DownloadProgress) {
        if let Some(total) = progress.total() {
            self.set_length(total);
        }
        self.set_position(progress.bytes_downloaded);
    }
}

/// Shields the download loop from a misbehaving sink.
///
/// A panicking sink is logged once and then ignored for the rest of the
/// download.
pub(crate) struct GuardedSink<'a> {
    sink: Option<&'a dyn ProgressSink>,
    disabled: bool,
}

impl<'a> GuardedSink<'a> {
    pub(crate) fn new(sink: Option<&'a dyn ProgressSink>) -> Self {
        Self {
            sink,
            disabled: false,
        }
    }

    pub(crate) fn report(&mut self, progress: DownloadProgress) {
        let Some(sink) = self.sink else {
            return;
        };
        if self.disabled {
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| sink.on_progress(progress))).is_err() {
            warn!("progress sink panicked; ignoring further progress reports");
            self.disabled = true;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_total_maps_unknown_to_none() {
        let known = DownloadProgress {
            bytes_downloaded: 1,
            total_bytes: 10,
        };
        let unknown = DownloadProgress {
            bytes_downloaded: 1,
            total_bytes: -1,
        };
        assert_eq!(known.total(), Some(10));
        assert_eq!(unknown.total(), None);
    }

    #[test]
    fn test_closure_sink_receives_reports() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: DownloadProgress| seen.lock().unwrap().push(p.bytes_downloaded);
        let mut guarded = GuardedSink::new(Some(&sink));
        guarded.report(DownloadProgress {
            bytes_downloaded: 5,
            total_bytes: -1,
        });
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    struct PanickingSink {
        calls: Mutex<u32>,
    }

    impl ProgressSink for PanickingSink {
        fn on_progress(&self, _progress: DownloadProgress) {
            *self
                .calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) += 1;
            panic!("sink failure");
        }
    }

    #[test]
    fn test_panicking_sink_is_disabled_not_propagated() {
        let sink = PanickingSink {
            calls: Mutex::new(0),
        };
        let mut guarded = GuardedSink::new(Some(&sink));
        let progress = DownloadProgress {
            bytes_downloaded: 1,
            total_bytes: 2,
        };
        guarded.report(progress);
        guarded.report(progress);
        assert_eq!(
            *sink
                .calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
            1
        );
    }

    #[test]
    fn test_progress_bar_sink_tracks_position() {
        let bar = ProgressBar::hidden();
        bar.on_progress(DownloadProgress {
            bytes_downloaded: 512,
            total_bytes: 4096,
        });
        assert_eq!(bar.position(), 512);
        assert_eq!(bar.length(), Some(4096));
    }
}
