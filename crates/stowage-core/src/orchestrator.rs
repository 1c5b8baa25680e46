//! Transfer pipeline: validate, copy ∥ metadata, archive, report.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::archive::ArchiveJob;
use crate::config::StowageConfig;
use crate::copy::CopyJob;
use crate::errors::{TransferError, TransferResult};
use crate::format::{format_elapsed, format_size};
use crate::logger::{LogLogger, Logger};
use crate::metadata::{local_hostname, BaseMetadata, MetadataJob};
use crate::owner::{OwnerLookup, PlatformOwnerLookup};
use crate::scheduler::TaskScheduler;

pub const STAGING_DIR_NAME: &str = "temp";
pub const METADATA_FILE_NAME: &str = "metadata.json";
pub const ARCHIVE_FILE_NAME: &str = "final.zip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub path: PathBuf,
    /// Falls back to the configured batch size.
    pub batch_size: Option<usize>,
}

impl TransferRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            batch_size: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Pending,
    Validating,
    Running,
    Archiving,
    Completed,
    Failed,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferPhase::Pending => "pending",
            TransferPhase::Validating => "validating",
            TransferPhase::Running => "running",
            TransferPhase::Archiving => "archiving",
            TransferPhase::Completed => "completed",
            TransferPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// On-disk layout for one transferred source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferWorkspace {
    pub root: PathBuf,
    pub staging: PathBuf,
    pub metadata: PathBuf,
    pub archive: PathBuf,
}

impl TransferWorkspace {
    pub fn new(workspace_root: &Path, dir_name: &str) -> Self {
        let root = workspace_root.join(dir_name);
        Self {
            staging: root.join(STAGING_DIR_NAME),
            metadata: root.join(METADATA_FILE_NAME),
            archive: root.join(ARCHIVE_FILE_NAME),
            root,
        }
    }
}

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReport {
    #[serde(rename = "transferPath")]
    pub workspace: PathBuf,
    pub size: String,
    pub total_bytes: u64,
    pub file_count: u64,
    pub batch_size: usize,
    pub processing_time: String,
    #[serde(skip)]
    pub elapsed: Duration,
}

pub struct TransferOrchestrator {
    scheduler: TaskScheduler,
    config: StowageConfig,
    owner: Arc<dyn OwnerLookup>,
    logger: Arc<dyn Logger>,
    host: String,
    active: Mutex<HashSet<PathBuf>>,
}

/// Exclusive hold on a workspace root for the lifetime of one transfer.
struct WorkspaceClaim<'a> {
    active: &'a Mutex<HashSet<PathBuf>>,
    root: PathBuf,
}

impl Drop for WorkspaceClaim<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.root);
    }
}

impl TransferOrchestrator {
    pub fn new(scheduler: TaskScheduler, config: StowageConfig) -> Self {
        Self {
            scheduler,
            config,
            owner: Arc::new(PlatformOwnerLookup),
            logger: Arc::new(LogLogger),
            host: local_hostname(),
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_owner_lookup(mut self, owner: Arc<dyn OwnerLookup>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn config(&self) -> &StowageConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Workspace a request would write to, after the same checks `transfer` runs.
    pub async fn workspace_for(
        &self,
        request: &TransferRequest,
    ) -> TransferResult<TransferWorkspace> {
        self.validate(request).await.map(|(workspace, _)| workspace)
    }

    pub async fn transfer(&self, request: TransferRequest) -> TransferResult<TransferReport> {
        let source = request.path.clone();
        log_phase(&source, TransferPhase::Pending);
        let started = Instant::now();

        log_phase(&source, TransferPhase::Validating);
        let validated = self.validate(&request).await.and_then(|(workspace, batch_size)| {
            let claim = self.claim(&workspace)?;
            Ok((workspace, batch_size, claim))
        });
        let (workspace, batch_size, _claim) = match validated {
            Ok(validated) => validated,
            Err(err) => {
                log_phase(&source, TransferPhase::Failed);
                return Err(err);
            }
        };

        let outcome = self.run_pipeline(&source, &workspace, batch_size).await;
        let (file_count, total_bytes) = match outcome {
            Ok(counts) => counts,
            Err(err) => {
                log_phase(&source, TransferPhase::Failed);
                log::error!("transfer of {} failed: {err}", source.display());
                return Err(err);
            }
        };

        let elapsed = started.elapsed();
        log_phase(&source, TransferPhase::Completed);
        Ok(TransferReport {
            workspace: workspace.root,
            size: format_size(total_bytes),
            total_bytes,
            file_count,
            batch_size,
            processing_time: format_elapsed(elapsed),
            elapsed,
        })
    }

    async fn validate(&self, request: &TransferRequest) -> TransferResult<(TransferWorkspace, usize)> {
        let path = &request.path;
        if path.as_os_str().is_empty() {
            return Err(TransferError::InvalidInput(
                "a directory path is required".to_string(),
            ));
        }

        let batch_size = request.batch_size.unwrap_or(self.config.batch_size);
        if batch_size == 0 {
            return Err(TransferError::InvalidInput(
                "batch size must be a positive integer".to_string(),
            ));
        }

        let metadata = tokio::fs::metadata(path).await.map_err(|err| {
            TransferError::InvalidInput(format!("{} is not accessible: {err}", path.display()))
        })?;
        if !metadata.is_dir() {
            return Err(TransferError::InvalidInput(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        // Resolve `.`/`..` so the workspace is named after the real directory.
        let resolved = tokio::fs::canonicalize(path).await.map_err(|err| {
            TransferError::InvalidInput(format!("cannot resolve {}: {err}", path.display()))
        })?;
        let dir_name = resolved
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TransferError::InvalidInput(format!(
                    "{} has no directory name to stage under",
                    path.display()
                ))
            })?;

        let workspace = TransferWorkspace::new(&self.config.workspace_root, &dir_name);
        let workspace_root = resolve_lenient(&workspace.root).await.map_err(|err| {
            TransferError::InvalidInput(format!(
                "cannot resolve workspace {}: {err}",
                workspace.root.display()
            ))
        })?;
        if workspace_root.starts_with(&resolved) {
            return Err(TransferError::InvalidInput(format!(
                "workspace {} lies inside the source {}",
                workspace.root.display(),
                path.display()
            )));
        }

        Ok((workspace, batch_size))
    }

    fn claim(&self, workspace: &TransferWorkspace) -> TransferResult<WorkspaceClaim<'_>> {
        let mut active = self.active.lock();
        if !active.insert(workspace.root.clone()) {
            return Err(TransferError::InvalidInput(format!(
                "workspace {} is in use by another transfer",
                workspace.root.display()
            )));
        }
        Ok(WorkspaceClaim {
            active: &self.active,
            root: workspace.root.clone(),
        })
    }

    async fn run_pipeline(
        &self,
        source: &Path,
        workspace: &TransferWorkspace,
        batch_size: usize,
    ) -> TransferResult<(u64, u64)> {
        tokio::fs::create_dir_all(&workspace.staging)
            .await
            .map_err(|err| TransferError::Workspace {
                path: workspace.staging.clone(),
                source: err,
            })?;

        log_phase(source, TransferPhase::Running);
        let walker = self.config.walker_options(batch_size);

        let copy = self.scheduler.submit(
            CopyJob::new(source, &workspace.staging)
                .with_walker(walker)
                .with_buffer_bytes(self.config.copy_buffer_bytes)
                .with_logger(Arc::clone(&self.logger)),
        );
        let metadata = self.scheduler.submit(
            MetadataJob::new(
                source,
                BaseMetadata::new(source, self.host.clone()),
                &workspace.metadata,
            )
            .with_walker(walker)
            .with_owner_lookup(Arc::clone(&self.owner)),
        );

        let (copied, described) = tokio::join!(copy.join(), metadata.join());

        let (copied, described) = match (copied, described) {
            (Ok(copied), Ok(described)) => (copied, described),
            (copied, described) => {
                let failures = [copied.err(), described.err()]
                    .into_iter()
                    .flatten()
                    .collect();
                return Err(TransferError::Aggregate(failures));
            }
        };

        if copied.bytes != described.total_size {
            log::warn!(
                "copy wrote {} bytes but metadata recorded {} for {}",
                copied.bytes,
                described.total_size,
                source.display()
            );
        }

        log_phase(source, TransferPhase::Archiving);
        self.scheduler
            .submit(ArchiveJob::new(&workspace.staging, &workspace.archive))
            .join()
            .await
            .map_err(TransferError::Archive)?;

        Ok((described.file_count, described.total_size))
    }
}

/// Canonicalize the longest existing prefix of `path` and append the rest.
async fn resolve_lenient(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        match tokio::fs::canonicalize(existing).await {
            Ok(mut resolved) => {
                resolved.extend(missing.iter().rev());
                return Ok(resolved);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Err(err),
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn log_phase(source: &Path, phase: TransferPhase) {
    log::info!("transfer {}: {phase}", source.display());
}
