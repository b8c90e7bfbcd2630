//! Conversion from CLI arguments to library configuration

use crate::cli::main_impl::Cli;
use crate::config::{JsonSettingsStore, SettingsStore, VisionConfig};
use anyhow::{Context, Result};
use std::sync::Arc;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the tool configuration from global flags
    pub(crate) fn from_cli(cli: &Cli) -> Result<VisionConfig> {
        let mut builder = VisionConfig::builder()
            .inpaint_padding(cli.inpaint_padding)
            .inpaint_min_size(cli.inpaint_min_size)
            .min_background_removal_size(cli.min_size);
        if let Some(dir) = &cli.data_dir {
            builder = builder.data_dir(dir);
        }
        builder.build().context("Invalid configuration")
    }

    /// Settings file under `--config-dir`, or the platform location
    pub(crate) fn settings_store(cli: &Cli) -> Result<Arc<dyn SettingsStore>> {
        let store = match &cli.config_dir {
            Some(dir) => JsonSettingsStore::new(dir.join("settings.json")),
            None => JsonSettingsStore::default_location()
                .context("Failed to determine the settings location")?,
        };
        log::debug!("Settings file: {}", store.path().display());
        Ok(Arc::new(store))
    }

    /// Reject argument combinations clap cannot express
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if cli.inpaint_min_size == 0 {
            anyhow::bail!("--inpaint-min-size must be at least 1");
        }
        if let Some(dir) = &cli.data_dir {
            if dir.is_file() {
                anyhow::bail!("Data directory is a file: {}", dir.display());
            }
        }
        Ok(())
    }
}
