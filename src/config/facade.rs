//! Config loading entry points.

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::GenpipeConfig;
use crate::error::GenerationError;
use config::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads [`GenpipeConfig`] from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence, lowest first: defaults, global file, `<root>/genpipe.toml`,
    /// `GENPIPE__*` environment variables.
    pub fn load(workspace_root: &Path) -> Result<GenpipeConfig, GenerationError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder);

        let config: GenpipeConfig = builder.build()?.try_deserialize()?;
        debug!(
            workspace_root = %workspace_root.display(),
            backend = %config.channel.backend,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load a single explicit file on top of the defaults, still honoring
    /// environment overrides.
    pub fn load_from_file(path: &Path) -> Result<GenpipeConfig, GenerationError> {
        if !path.exists() {
            return Err(GenerationError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let builder = merge_policy::builder_with_defaults()?
            .add_source(File::from(path.to_path_buf()).required(true));
        let builder = environment::add_to_builder(builder);
        Ok(builder.build()?.try_deserialize()?)
    }

    /// Load and validate, folding validation errors into one config error.
    pub fn load_validated(workspace_root: &Path) -> Result<GenpipeConfig, GenerationError> {
        let config = Self::load(workspace_root)?;
        config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            GenerationError::Config(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        Ok(config)
    }

    pub fn xdg_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    pub fn workspace_config_path(workspace_root: &Path) -> PathBuf {
        workspace_file::workspace_config_path(workspace_root)
    }
}
