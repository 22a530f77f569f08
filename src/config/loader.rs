//! Layered configuration loading.

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::SluiceConfig;
use crate::error::StreamError;
use config::{File, FileFormat};
use std::path::{Path, PathBuf};

/// Loads [`SluiceConfig`] from defaults, files and the environment.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence (lowest to highest): defaults, global file, workspace
    /// `config/sluice.toml`, workspace `config/{SLUICE_ENV}.toml`,
    /// `SLUICE__*` environment variables.
    pub fn load(workspace_root: &Path) -> Result<SluiceConfig, StreamError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder);
        let config: SluiceConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a single file over the defaults.
    pub fn load_from_file(path: &Path) -> Result<SluiceConfig, StreamError> {
        if !path.exists() {
            return Err(StreamError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let config: SluiceConfig = merge_policy::builder_with_defaults()?
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Location of the user-level configuration file, if one can be resolved.
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}
