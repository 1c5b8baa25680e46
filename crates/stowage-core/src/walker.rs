//! Batched recursive directory traversal.
//!
//! Siblings are handled in consecutive groups of at most `batch_size`: every
//! entry of a group runs concurrently and the whole group must finish before
//! the next group starts. Subdirectories recurse as part of their own entry's
//! operation, each on a Tokio task of its own, so nested groups can run inside
//! an outer group and a panic below the root surfaces as an error.
//!
//! The batch size only bounds siblings. A wide and deep tree can still have
//! many operations in flight across levels; set `max_in_flight` to cap file
//! operations for the whole walk.

use std::ffi::OsString;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{bail, eyre, Context, Result};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::Semaphore;

pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkerOptions {
    pub batch_size: usize,
    pub max_in_flight: Option<usize>,
}

impl Default for WalkerOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: None,
        }
    }
}

/// A file or directory reached by the walk.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Full path on disk.
    pub path: PathBuf,
    /// Path relative to the walk root; empty for the root itself.
    pub relative: PathBuf,
    /// Metadata with symlinks followed.
    pub metadata: Metadata,
}

impl WalkEntry {
    pub fn is_dir(&self) -> bool {
        self.metadata.is_dir()
    }

    pub fn size(&self) -> u64 {
        self.metadata.len()
    }
}

/// Per-entry behaviour plugged into [`BatchedWalker::walk`].
///
/// Each file yields an accumulator; a directory's accumulator is the merge of
/// everything beneath it. Subdirectories are walked on their own Tokio tasks,
/// so visitors are shared through an `Arc` and must be `'static`.
#[async_trait]
pub trait TreeVisitor: Send + Sync + 'static {
    type Acc: Default + Send + 'static;

    /// Called for every directory (root included) before it is listed.
    async fn enter_dir(&self, _dir: &WalkEntry) -> Result<()> {
        Ok(())
    }

    async fn visit_file(&self, file: &WalkEntry) -> Result<Self::Acc>;

    fn merge(&self, into: &mut Self::Acc, from: Self::Acc);
}

struct WalkState {
    batch_size: usize,
    limiter: Option<Semaphore>,
    batches: AtomicUsize,
}

pub struct BatchedWalker {
    state: Arc<WalkState>,
}

impl BatchedWalker {
    pub fn new(options: WalkerOptions) -> Result<Self> {
        if options.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        let limiter = match options.max_in_flight {
            Some(0) => bail!("max_in_flight must be at least 1 when set"),
            Some(limit) => Some(Semaphore::new(limit)),
            None => None,
        };
        Ok(Self {
            state: Arc::new(WalkState {
                batch_size: options.batch_size,
                limiter,
                batches: AtomicUsize::new(0),
            }),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.state.batch_size
    }

    /// Number of sibling groups started so far, across all directories.
    pub fn batches_started(&self) -> usize {
        self.state.batches.load(Ordering::Relaxed)
    }

    /// Walk `root`, which must be a directory, and return the merged result.
    pub async fn walk<V: TreeVisitor>(&self, visitor: Arc<V>, root: &Path) -> Result<V::Acc> {
        let metadata = tokio::fs::metadata(root)
            .await
            .with_context(|| format!("stat {}", root.display()))?;
        if !metadata.is_dir() {
            bail!("{} is not a directory", root.display());
        }
        let entry = WalkEntry {
            path: root.to_path_buf(),
            relative: PathBuf::new(),
            metadata,
        };
        walk_dir(Arc::clone(&self.state), visitor, entry).await
    }
}

fn walk_dir<V: TreeVisitor>(
    state: Arc<WalkState>,
    visitor: Arc<V>,
    dir: WalkEntry,
) -> BoxFuture<'static, Result<V::Acc>> {
    async move {
        visitor.enter_dir(&dir).await?;
        let names = list_names(&dir.path).await?;

        let mut acc = V::Acc::default();
        for batch in names.chunks(state.batch_size) {
            state.batches.fetch_add(1, Ordering::Relaxed);
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|name| visit_entry(&state, &visitor, &dir, name)),
            )
            .await;
            for outcome in outcomes {
                visitor.merge(&mut acc, outcome?);
            }
        }
        Ok(acc)
    }
    .boxed()
}

async fn visit_entry<V: TreeVisitor>(
    state: &Arc<WalkState>,
    visitor: &Arc<V>,
    parent: &WalkEntry,
    name: &OsString,
) -> Result<V::Acc> {
    let path = parent.path.join(name);
    let metadata = tokio::fs::metadata(&path)
        .await
        .with_context(|| format!("stat {}", path.display()))?;
    let entry = WalkEntry {
        relative: parent.relative.join(name),
        path,
        metadata,
    };

    if entry.is_dir() {
        // One task per subdirectory keeps the poll stack flat however deep
        // the tree goes.
        let dir_path = entry.path.clone();
        let subtree = walk_dir(Arc::clone(state), Arc::clone(visitor), entry);
        return tokio::spawn(subtree).await.map_err(|err| {
            eyre!(
                "walk of {} terminated abnormally: {err}",
                dir_path.display()
            )
        })?;
    }

    // Directories never hold a permit, otherwise a parent could starve
    // its own children.
    let _permit = match &state.limiter {
        Some(limiter) => Some(limiter.acquire().await?),
        None => None,
    };
    visitor.visit_file(&entry).await
}

async fn list_names(dir: &Path) -> Result<Vec<OsString>> {
    let mut read = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("read_dir {}", dir.display()))?;
    let mut names = Vec::new();
    while let Some(entry) = read
        .next_entry()
        .await
        .with_context(|| format!("read_dir {}", dir.display()))?
    {
        names.push(entry.file_name());
    }
    names.sort();
    Ok(names)
}
