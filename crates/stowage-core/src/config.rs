use directories::{BaseDirs, ProjectDirs};
use eyre::{bail, eyre, Context, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::copy::DEFAULT_COPY_BUFFER_BYTES;
use crate::walker::{WalkerOptions, DEFAULT_BATCH_SIZE};

pub const CONFIG_DIR_ENV: &str = "STOWAGE_CONFIG_DIR";
pub const CONFIG_FILE_NAME: &str = "stowage.toml";
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_WORKSPACE_ROOT: &str = "transfers";

static CONFIG_DIR_OVERRIDE: Lazy<RwLock<Option<PathBuf>>> = Lazy::new(|| RwLock::new(None));

/// Override the configuration directory for the current process.
/// Subsequent calls replace the previous override.
pub fn set_config_dir<P: AsRef<Path>>(path: P) {
    *CONFIG_DIR_OVERRIDE.write() = Some(path.as_ref().to_path_buf());
}

/// Clear any previously configured override.
pub fn clear_config_dir_override() {
    CONFIG_DIR_OVERRIDE.write().take();
}

/// Resolve the configuration directory.
/// Priority: explicit override -> $STOWAGE_CONFIG_DIR -> platform standard -> ~/.config/stowage
pub fn config_dir() -> Result<PathBuf> {
    if let Some(path) = CONFIG_DIR_OVERRIDE.read().clone() {
        return Ok(path);
    }

    if let Some(path) = std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    if let Some(proj) = ProjectDirs::from("com", "Stowage", "stowage") {
        return Ok(proj.config_dir().to_path_buf());
    }

    if let Some(base) = BaseDirs::new() {
        return Ok(base.home_dir().join(".config").join("stowage"));
    }

    Err(eyre!(
        "unable to determine configuration directory for stowage (no override and no platform default)"
    ))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StowageConfig {
    /// Directory that holds one workspace per transferred source.
    pub workspace_root: PathBuf,
    /// Jobs allowed to run at once.
    pub max_concurrency: usize,
    /// Siblings processed per group when walking a directory.
    pub batch_size: usize,
    /// Cap on file operations in flight across a whole walk.
    pub max_in_flight: Option<usize>,
    pub copy_buffer_bytes: usize,
}

impl Default for StowageConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from(DEFAULT_WORKSPACE_ROOT),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: None,
            copy_buffer_bytes: DEFAULT_COPY_BUFFER_BYTES,
        }
    }
}

impl StowageConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file: {}", path.display()))?;
        let config: StowageConfig = toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `stowage.toml` from the config directory, or defaults if absent.
    pub fn load_default() -> Result<Self> {
        let path = config_dir()?.join(CONFIG_FILE_NAME);
        if path.is_file() {
            log::debug!("loading configuration from {}", path.display());
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            bail!("max_concurrency must be at least 1");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.max_in_flight == Some(0) {
            bail!("max_in_flight must be at least 1 when set");
        }
        if self.copy_buffer_bytes == 0 {
            bail!("copy_buffer_bytes must be at least 1");
        }
        Ok(())
    }

    pub fn walker_options(&self, batch_size: usize) -> WalkerOptions {
        WalkerOptions {
            batch_size,
            max_in_flight: self.max_in_flight,
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).wrap_err("failed to render configuration")
    }
}
