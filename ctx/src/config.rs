use serde::Deserialize;
use spinup_fs::{self as fs, FsError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::paths::Paths;

pub const CONFIG_ENV_VAR: &str = "SPINUP_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found at: {0}")]
    NotFound(PathBuf),

    #[error(transparent)]
    Read(#[from] FsError),

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("poll_interval_ms must be greater than zero")]
    ZeroPollInterval,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    connect_uri: Option<String>,
    network: Option<String>,
    images_dir: Option<PathBuf>,
    instances_dir: Option<PathBuf>,
    ssh_public_key: Option<PathBuf>,
    ssh_program: Option<String>,
    ssh_port: Option<u16>,
    poll_interval_ms: Option<u64>,
    wait_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Hypervisor connection, passed to `virsh -c`.
    pub connect_uri: String,
    /// Virtual network machines attach to and lease addresses from.
    pub network: String,
    pub images_dir: PathBuf,
    pub instances_dir: PathBuf,
    pub ssh_public_key: PathBuf,
    pub ssh_program: String,
    pub ssh_port: u16,
    pub poll_interval: Duration,
    /// Deadline for every wait loop. `None` waits forever.
    pub wait_timeout: Option<Duration>,
}

impl Config {
    pub fn defaults(paths: &Paths) -> Self {
        Self::resolve(ConfigToml::default(), paths)
    }

    /// Load configuration from the first source that applies: an explicit
    /// path, the `SPINUP_CONFIG` path, or the per-user config file if present.
    pub async fn load(
        explicit: Option<&Path>,
        env_path: Option<PathBuf>,
        paths: &Paths,
    ) -> Result<Self, ConfigError> {
        let path = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => {
                if !fs::path_exists(&path).await? {
                    return Err(ConfigError::NotFound(path));
                }
                Some(path)
            }
            None => {
                let path = paths.config_file();
                fs::path_exists(&path).await?.then_some(path)
            }
        };

        let Some(path) = path else {
            debug!("no config file, using defaults");
            return Ok(Self::defaults(paths));
        };

        debug!("loading config from {}", path.display());
        let text = fs::read_file_to_string(&path).await?;
        Self::parse(&path, &text, paths)
    }

    fn parse(path: &Path, text: &str, paths: &Paths) -> Result<Self, ConfigError> {
        let toml: ConfigToml = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if toml.poll_interval_ms == Some(0) {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(Self::resolve(toml, paths))
    }

    fn resolve(toml: ConfigToml, paths: &Paths) -> Self {
        let ConfigToml {
            connect_uri,
            network,
            images_dir,
            instances_dir,
            ssh_public_key,
            ssh_program,
            ssh_port,
            poll_interval_ms,
            wait_timeout_secs,
        } = toml;

        Config {
            connect_uri: connect_uri.unwrap_or_else(|| "qemu:///system".to_owned()),
            network: network.unwrap_or_else(|| "default".to_owned()),
            images_dir: images_dir
                .map(|dir| paths.expand_home(&dir))
                .unwrap_or_else(|| paths.default_images_dir()),
            instances_dir: instances_dir
                .map(|dir| paths.expand_home(&dir))
                .unwrap_or_else(|| paths.default_instances_dir()),
            ssh_public_key: paths.expand_home(
                &ssh_public_key.unwrap_or_else(|| PathBuf::from("~/.ssh/id_rsa.pub")),
            ),
            ssh_program: ssh_program.unwrap_or_else(|| "ssh".to_owned()),
            ssh_port: ssh_port.unwrap_or(22),
            poll_interval: Duration::from_millis(poll_interval_ms.unwrap_or(1000)),
            wait_timeout: wait_timeout_secs.map(Duration::from_secs),
        }
    }
}
