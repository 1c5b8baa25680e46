//! Per-file progress hooks for the copy path.

use std::path::Path;

pub trait Logger: Send + Sync {
    fn start(&self, src: &Path, dst: &Path);
    fn copy_done(&self, src: &Path, dst: &Path, bytes: u64);
}

/// Discards every event.
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn start(&self, _src: &Path, _dst: &Path) {}
    fn copy_done(&self, _src: &Path, _dst: &Path, _bytes: u64) {}
}

/// Forwards events to the `log` facade at trace/debug level.
pub struct LogLogger;

impl Logger for LogLogger {
    fn start(&self, src: &Path, dst: &Path) {
        log::trace!("copy {} -> {}", src.display(), dst.display());
    }

    fn copy_done(&self, src: &Path, dst: &Path, bytes: u64) {
        log::debug!(
            "copied {} -> {} ({} bytes)",
            src.display(),
            dst.display(),
            bytes
        );
    }
}
