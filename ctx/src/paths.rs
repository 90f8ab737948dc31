use std::{
    env,
    path::{Path, PathBuf},
};
use thiserror::Error;

const PROJECT_NAME: &str = "spinup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    home_dir: PathBuf,
    data_dir: PathBuf,
    cache_dir: PathBuf,
    runtime_dir: PathBuf,
    config_dir: PathBuf,
}

#[derive(Error, Debug, Clone)]
pub enum PathsError {
    #[error("environment variable {var} is not set")]
    Var { var: &'static str },
}

impl Paths {
    /// Resolve XDG directories from the process environment.
    pub fn create() -> Result<Paths, PathsError> {
        Self::from_lookup(|var| env::var(var).ok().filter(|value| !value.is_empty()))
    }

    /// Resolve XDG directories through `lookup`, falling back to `HOME`.
    pub fn from_lookup<F>(lookup: F) -> Result<Paths, PathsError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let home_dir: PathBuf = lookup("HOME")
            .map(From::from)
            .ok_or(PathsError::Var { var: "HOME" })?;

        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join(".local").join("share"));
        let cache_dir = lookup("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join(".cache"));
        let config_dir = lookup("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join(".config"));
        let runtime_dir = lookup("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .or_else(|| lookup("UID").map(|uid| PathBuf::from(format!("/run/user/{uid}"))))
            .unwrap_or_else(env::temp_dir);

        Ok(Paths {
            home_dir,
            data_dir: data_dir.join(PROJECT_NAME),
            cache_dir: cache_dir.join(PROJECT_NAME),
            runtime_dir: runtime_dir.join(PROJECT_NAME),
            config_dir: config_dir.join(PROJECT_NAME),
        })
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn default_images_dir(&self) -> PathBuf {
        self.cache_dir.join("images")
    }

    pub fn default_instances_dir(&self) -> PathBuf {
        self.data_dir.join("instances")
    }

    /// Expand a leading `~/` against the home directory.
    pub fn expand_home(&self, path: &Path) -> PathBuf {
        match path.strip_prefix("~") {
            Ok(rest) => self.home_dir.join(rest),
            Err(_) => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> =
            vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn falls_back_to_home() {
        let paths = Paths::from_lookup(lookup(&[("HOME", "/home/ada"), ("UID", "1000")])).unwrap();
        assert_eq!(paths.data_dir(), Path::new("/home/ada/.local/share/spinup"));
        assert_eq!(paths.cache_dir(), Path::new("/home/ada/.cache/spinup"));
        assert_eq!(paths.config_dir(), Path::new("/home/ada/.config/spinup"));
        assert_eq!(paths.runtime_dir(), Path::new("/run/user/1000/spinup"));
        assert_eq!(
            paths.default_images_dir(),
            PathBuf::from("/home/ada/.cache/spinup/images")
        );
    }

    #[test]
    fn honours_xdg_overrides() {
        let paths = Paths::from_lookup(lookup(&[
            ("HOME", "/home/ada"),
            ("XDG_DATA_HOME", "/data"),
            ("XDG_CACHE_HOME", "/cache"),
            ("XDG_CONFIG_HOME", "/etc/xdg"),
            ("XDG_RUNTIME_DIR", "/run/user/1"),
        ]))
        .unwrap();
        assert_eq!(paths.default_instances_dir(), PathBuf::from("/data/spinup/instances"));
        assert_eq!(paths.cache_dir(), Path::new("/cache/spinup"));
        assert_eq!(paths.config_file(), PathBuf::from("/etc/xdg/spinup/config.toml"));
        assert_eq!(paths.runtime_dir(), Path::new("/run/user/1/spinup"));
    }

    #[test]
    fn requires_home() {
        assert!(matches!(
            Paths::from_lookup(lookup(&[])),
            Err(PathsError::Var { var: "HOME" })
        ));
    }

    #[test]
    fn expands_tilde() {
        let paths = Paths::from_lookup(lookup(&[("HOME", "/home/ada")])).unwrap();
        assert_eq!(
            paths.expand_home(Path::new("~/.ssh/id_ed25519.pub")),
            PathBuf::from("/home/ada/.ssh/id_ed25519.pub")
        );
        assert_eq!(
            paths.expand_home(Path::new("/keys/id.pub")),
            PathBuf::from("/keys/id.pub")
        );
    }
}
