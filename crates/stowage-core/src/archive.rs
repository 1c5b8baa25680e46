//! Zip packing of a staged directory tree.
//!
//! Entries are named relative to the packed directory, which itself does not
//! appear as an entry. Subdirectories get explicit entries so empty ones
//! survive extraction.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eyre::{bail, eyre, Context, Result};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::format::rel_path_to_string;
use crate::scheduler::Job;

/// Highest deflate effort.
pub const MAX_COMPRESSION_LEVEL: i32 = 9;

const ZIP32_LIMIT: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// File and directory entries written.
    pub entries: u64,
    /// Uncompressed bytes read from the source tree.
    pub bytes_in: u64,
    /// Size of the finished archive on disk.
    pub archive_bytes: u64,
}

pub struct ArchiveJob {
    pub source_dir: PathBuf,
    pub output: PathBuf,
}

impl ArchiveJob {
    pub fn new(source_dir: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            output: output.into(),
        }
    }
}

#[async_trait]
impl Job for ArchiveJob {
    type Output = ArchiveSummary;

    fn kind(&self) -> &'static str {
        "archive"
    }

    async fn run(self) -> Result<ArchiveSummary> {
        let ArchiveJob { source_dir, output } = self;
        tokio::task::spawn_blocking(move || zip_directory(&source_dir, &output))
            .await
            .map_err(|err| eyre!("archive worker failed: {err}"))?
    }
}

/// Pack `source_dir` into a zip at `output` and sync it to disk.
pub fn zip_directory(source_dir: &Path, output: &Path) -> Result<ArchiveSummary> {
    if !source_dir.is_dir() {
        bail!("{} is not a directory", source_dir.display());
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }

    let file = File::create(output).with_context(|| format!("create {}", output.display()))?;
    let mut writer = ZipWriter::new(file);
    let base_options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(MAX_COMPRESSION_LEVEL));

    let mut summary = ArchiveSummary::default();
    for entry in WalkDir::new(source_dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("walk {}", source_dir.display()))?;
        let rel = entry
            .path()
            .strip_prefix(source_dir)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let name = rel_path_to_string(rel);

        if entry.file_type().is_dir() {
            writer
                .add_directory(name.as_str(), base_options)
                .with_context(|| format!("add directory {name}"))?;
            summary.entries += 1;
            continue;
        }

        let mut src = File::open(entry.path())
            .with_context(|| format!("open {}", entry.path().display()))?;
        let len = src
            .metadata()
            .with_context(|| format!("stat {}", entry.path().display()))?
            .len();
        let options = base_options.large_file(len >= ZIP32_LIMIT);
        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("start entry {name}"))?;
        let copied = io::copy(&mut src, &mut writer)
            .with_context(|| format!("compress {}", entry.path().display()))?;
        summary.entries += 1;
        summary.bytes_in += copied;
    }

    let file = writer
        .finish()
        .with_context(|| format!("finalize {}", output.display()))?;
    file.sync_all()
        .with_context(|| format!("sync {}", output.display()))?;
    summary.archive_bytes = file
        .metadata()
        .with_context(|| format!("stat {}", output.display()))?
        .len();

    log::info!(
        "archived {} entries ({} bytes) into {} ({} bytes)",
        summary.entries,
        summary.bytes_in,
        output.display(),
        summary.archive_bytes
    );
    Ok(summary)
}
