//! File ownership queries.
//!
//! Lookups are best effort: callers turn an error into an absent owner.

use std::path::Path;

use eyre::Result;

pub trait OwnerLookup: Send + Sync {
    /// Name of the account owning `path`.
    fn owner(&self, path: &Path) -> Result<String>;
}

/// Queries the host's account database.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformOwnerLookup;

#[cfg(unix)]
impl OwnerLookup for PlatformOwnerLookup {
    fn owner(&self, path: &Path) -> Result<String> {
        use eyre::Context;
        use nix::unistd::{Uid, User};
        use std::os::unix::fs::MetadataExt;

        let uid = std::fs::metadata(path)
            .with_context(|| format!("stat {}", path.display()))?
            .uid();
        let user = User::from_uid(Uid::from_raw(uid))
            .with_context(|| format!("resolve uid {uid} for {}", path.display()))?;
        // Accounts without a passwd entry are reported by numeric id.
        Ok(user.map(|u| u.name).unwrap_or_else(|| uid.to_string()))
    }
}

#[cfg(not(unix))]
impl OwnerLookup for PlatformOwnerLookup {
    fn owner(&self, path: &Path) -> Result<String> {
        eyre::bail!(
            "owner lookup is not supported on this platform ({})",
            path.display()
        )
    }
}

/// Always fails; useful where ownership is irrelevant.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOwnerLookup;

impl OwnerLookup for NoOwnerLookup {
    fn owner(&self, path: &Path) -> Result<String> {
        eyre::bail!("owner lookup disabled for {}", path.display())
    }
}
