//! Streaming directory copy driven by the batched walker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufReader};

use crate::logger::{Logger, NoopLogger};
use crate::scheduler::Job;
use crate::walker::{BatchedWalker, TreeVisitor, WalkEntry, WalkerOptions};

pub const DEFAULT_COPY_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopySummary {
    pub files: u64,
    pub bytes: u64,
}

/// Copy one file through a fixed-size buffer; returns bytes written.
pub async fn copy_file_streaming(src: &Path, dst: &Path, buffer_bytes: usize) -> Result<u64> {
    let src_file = File::open(src)
        .await
        .with_context(|| format!("open {}", src.display()))?;
    let mut dst_file = File::create(dst)
        .await
        .with_context(|| format!("create {}", dst.display()))?;

    let mut reader = BufReader::with_capacity(buffer_bytes.max(1), src_file);
    let bytes = tokio::io::copy_buf(&mut reader, &mut dst_file)
        .await
        .with_context(|| format!("copy {} -> {}", src.display(), dst.display()))?;
    dst_file
        .flush()
        .await
        .with_context(|| format!("flush {}", dst.display()))?;
    Ok(bytes)
}

pub struct CopyJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub walker: WalkerOptions,
    pub buffer_bytes: usize,
    pub logger: Arc<dyn Logger>,
}

impl CopyJob {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            walker: WalkerOptions::default(),
            buffer_bytes: DEFAULT_COPY_BUFFER_BYTES,
            logger: Arc::new(NoopLogger),
        }
    }

    pub fn with_walker(mut self, walker: WalkerOptions) -> Self {
        self.walker = walker;
        self
    }

    pub fn with_buffer_bytes(mut self, buffer_bytes: usize) -> Self {
        self.buffer_bytes = buffer_bytes;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Copy the tree without going through a scheduler.
    pub async fn execute(&self) -> Result<CopySummary> {
        fs::create_dir_all(&self.destination)
            .await
            .with_context(|| format!("create destination {}", self.destination.display()))?;

        let walker = BatchedWalker::new(self.walker)?;
        let visitor = Arc::new(CopyVisitor {
            dest_root: self.destination.clone(),
            buffer_bytes: self.buffer_bytes,
            logger: Arc::clone(&self.logger),
        });
        let summary = walker.walk(visitor, &self.source).await?;
        log::info!(
            "copied {} file(s), {} bytes from {} to {}",
            summary.files,
            summary.bytes,
            self.source.display(),
            self.destination.display()
        );
        Ok(summary)
    }
}

#[async_trait]
impl Job for CopyJob {
    type Output = CopySummary;

    fn kind(&self) -> &'static str {
        "copy"
    }

    async fn run(self) -> Result<CopySummary> {
        self.execute().await
    }
}

struct CopyVisitor {
    dest_root: PathBuf,
    buffer_bytes: usize,
    logger: Arc<dyn Logger>,
}

#[async_trait]
impl TreeVisitor for CopyVisitor {
    type Acc = CopySummary;

    async fn enter_dir(&self, dir: &WalkEntry) -> Result<()> {
        let target = self.dest_root.join(&dir.relative);
        fs::create_dir_all(&target)
            .await
            .with_context(|| format!("create directory {}", target.display()))
    }

    async fn visit_file(&self, file: &WalkEntry) -> Result<CopySummary> {
        let target = self.dest_root.join(&file.relative);
        self.logger.start(&file.path, &target);
        let bytes = copy_file_streaming(&file.path, &target, self.buffer_bytes).await?;
        self.logger.copy_done(&file.path, &target, bytes);
        Ok(CopySummary { files: 1, bytes })
    }

    fn merge(&self, into: &mut CopySummary, from: CopySummary) {
        into.files += from.files;
        into.bytes += from.bytes;
    }
}
