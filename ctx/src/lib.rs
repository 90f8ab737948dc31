mod config;
mod paths;

use spinup_fs::{self as fs, FsError};
use std::{env, path::Path};
use thiserror::Error;

pub use crate::config::{CONFIG_ENV_VAR, Config, ConfigError};
pub use crate::paths::{Paths, PathsError};

#[derive(Error, Debug)]
pub enum ContextError {
    #[error(transparent)]
    Paths(#[from] PathsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Resolved directories and settings for one invocation.
#[derive(Debug, Clone)]
pub struct Context {
    paths: Paths,
    config: Config,
}

impl Context {
    pub fn new(paths: Paths, config: Config) -> Self {
        Self { paths, config }
    }

    pub async fn create(config_path: Option<&Path>) -> Result<Self, ContextError> {
        let paths = Paths::create()?;
        let env_path = env::var_os(CONFIG_ENV_VAR).map(From::from);
        let config = Config::load(config_path, env_path, &paths).await?;
        Ok(Self { paths, config })
    }

    /// Create the directories this invocation writes into.
    pub async fn setup_dirs(&self) -> Result<(), ContextError> {
        fs::setup_directory_access(&self.config.images_dir).await?;
        fs::setup_directory_access(&self.config.instances_dir).await?;
        fs::setup_directory_access(self.paths.runtime_dir()).await?;
        Ok(())
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
