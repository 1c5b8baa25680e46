//! Per-file metadata collection and the persisted metadata document.
//!
//! The walk produces one [`FileEntry`] per regular file: a streaming SHA-256,
//! formatted size, the three timestamps and the owning account. Directory
//! results are merged upward; only the root call writes the document.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::checksum::sha256_file;
use crate::format::{format_size, format_timestamp, rel_path_to_string};
use crate::owner::{OwnerLookup, PlatformOwnerLookup};
use crate::scheduler::Job;
use crate::walker::{BatchedWalker, TreeVisitor, WalkEntry, WalkerOptions};

/// Caller-supplied fields copied to the top of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseMetadata {
    /// Source directory as requested.
    pub filepath: String,
    /// Host the document was produced on.
    pub computer: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BaseMetadata {
    pub fn new(source: &Path, computer: impl Into<String>) -> Self {
        Self {
            filepath: source.display().to_string(),
            computer: computer.into(),
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

pub fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(err) => {
            log::warn!("failed to read host name: {err}");
            "unknown".to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Path relative to the metadata root, `/`-separated.
    pub filepath: String,
    pub size: String,
    /// Absent where the filesystem does not record creation time.
    pub birthtime: Option<String>,
    pub last_modified: String,
    pub last_accessed: String,
    pub owner: Option<String>,
    pub checksum: String,
    #[serde(skip)]
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    #[serde(flatten)]
    pub base: BaseMetadata,
    pub files: Vec<FileEntry>,
    #[serde(rename = "totalSize")]
    pub total_size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataOutcome {
    pub document: MetadataDocument,
    pub file_count: u64,
    pub total_size: u64,
}

/// Running totals for one directory and everything beneath it.
#[derive(Debug, Default)]
pub struct MetadataAccumulator {
    pub entries: Vec<FileEntry>,
    pub file_count: u64,
    pub total_size: u64,
}

pub struct MetadataJob {
    pub root: PathBuf,
    pub base: BaseMetadata,
    pub output: PathBuf,
    pub walker: WalkerOptions,
    pub owner: Arc<dyn OwnerLookup>,
}

impl MetadataJob {
    pub fn new(root: impl Into<PathBuf>, base: BaseMetadata, output: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base,
            output: output.into(),
            walker: WalkerOptions::default(),
            owner: Arc::new(PlatformOwnerLookup),
        }
    }

    pub fn with_walker(mut self, walker: WalkerOptions) -> Self {
        self.walker = walker;
        self
    }

    pub fn with_owner_lookup(mut self, owner: Arc<dyn OwnerLookup>) -> Self {
        self.owner = owner;
        self
    }

    pub async fn execute(self) -> Result<MetadataOutcome> {
        let walker = BatchedWalker::new(self.walker)?;
        let visitor = Arc::new(MetadataVisitor {
            owner: Arc::clone(&self.owner),
        });
        let acc = walker.walk(visitor, &self.root).await?;

        let document = MetadataDocument {
            base: self.base,
            files: acc.entries,
            total_size: acc.total_size,
        };
        write_document(&self.output, &document).await?;
        log::info!(
            "wrote metadata for {} file(s), {} bytes to {}",
            acc.file_count,
            acc.total_size,
            self.output.display()
        );

        Ok(MetadataOutcome {
            document,
            file_count: acc.file_count,
            total_size: acc.total_size,
        })
    }
}

#[async_trait]
impl Job for MetadataJob {
    type Output = MetadataOutcome;

    fn kind(&self) -> &'static str {
        "metadata"
    }

    async fn run(self) -> Result<MetadataOutcome> {
        self.execute().await
    }
}

pub async fn write_document(path: &Path, document: &MetadataDocument) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(document).wrap_err("serialize metadata document")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("write {}", path.display()))
}

pub async fn read_document(path: &Path) -> Result<MetadataDocument> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parse {}", path.display()))
}

struct MetadataVisitor {
    owner: Arc<dyn OwnerLookup>,
}

impl MetadataVisitor {
    async fn lookup_owner(&self, path: &Path) -> Option<String> {
        let owner = Arc::clone(&self.owner);
        let target = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || owner.owner(&target)).await;
        match result {
            Ok(Ok(name)) => Some(name),
            Ok(Err(err)) => {
                log::warn!("owner lookup failed for {}: {err:#}", path.display());
                None
            }
            Err(err) => {
                log::warn!("owner lookup aborted for {}: {err}", path.display());
                None
            }
        }
    }
}

#[async_trait]
impl TreeVisitor for MetadataVisitor {
    type Acc = MetadataAccumulator;

    async fn visit_file(&self, file: &WalkEntry) -> Result<MetadataAccumulator> {
        let checksum = sha256_file(&file.path).await?;
        let meta = &file.metadata;
        let modified = meta
            .modified()
            .with_context(|| format!("modification time of {}", file.path.display()))?;
        let accessed = meta
            .accessed()
            .with_context(|| format!("access time of {}", file.path.display()))?;
        let birthtime = match meta.created() {
            Ok(created) => Some(format_timestamp(created)),
            Err(err) => {
                log::debug!("no creation time for {}: {err}", file.path.display());
                None
            }
        };
        let owner = self.lookup_owner(&file.path).await;

        let bytes = file.size();
        let entry = FileEntry {
            filepath: rel_path_to_string(&file.relative),
            size: format_size(bytes),
            birthtime,
            last_modified: format_timestamp(modified),
            last_accessed: format_timestamp(accessed),
            owner,
            checksum,
            bytes,
        };

        Ok(MetadataAccumulator {
            entries: vec![entry],
            file_count: 1,
            total_size: bytes,
        })
    }

    fn merge(&self, into: &mut MetadataAccumulator, from: MetadataAccumulator) {
        into.entries.extend(from.entries);
        into.file_count += from.file_count;
        into.total_size += from.total_size;
    }
}
