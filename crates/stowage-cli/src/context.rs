use eyre::Result;
use stowage_core::config::{self, StowageConfig};

use crate::cli::{Cli, TransferArgs};

#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: StowageConfig,
}

impl AppContext {
    pub fn load(cli: &Cli) -> Result<Self> {
        if let Some(dir) = &cli.config_dir {
            config::set_config_dir(dir);
        }
        let config = match &cli.config {
            Some(path) => StowageConfig::load(path)?,
            None => StowageConfig::load_default()?,
        };
        log::debug!("effective configuration: {config:?}");
        Ok(Self { config })
    }

    /// Apply command-line overrides on top of the loaded file values.
    pub fn with_transfer_overrides(mut self, args: &TransferArgs) -> Result<Self> {
        if let Some(root) = &args.workspace_root {
            self.config.workspace_root = root.clone();
        }
        if let Some(max) = args.max_concurrency {
            self.config.max_concurrency = max;
        }
        if let Some(limit) = args.max_in_flight {
            self.config.max_in_flight = Some(limit);
        }
        self.config.validate()?;
        Ok(self)
    }
}
