use std::{
    convert::Infallible,
    fmt::{self, Display},
    path::Path,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hostname(String);

impl Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Hostname {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl FromStr for Hostname {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for Hostname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifies every machine created by one `create` run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    /// Source directory basename plus a fresh unique suffix.
    pub fn generate(source_dir: &Path) -> Self {
        let base = source_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "root".to_owned());
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{base}-{}", &suffix[..12]))
    }
}

impl Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ClusterId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for ClusterId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_id_uses_directory_basename() {
        let id = ClusterId::generate(Path::new("/home/me/projects/webfarm"));
        assert!(id.as_ref().starts_with("webfarm-"));
        assert_eq!(id.as_ref().len(), "webfarm-".len() + 12);
    }

    #[test]
    fn cluster_ids_are_fresh() {
        let path = Path::new("/srv/app");
        assert_ne!(ClusterId::generate(path), ClusterId::generate(path));
    }

    #[test]
    fn cluster_id_for_filesystem_root() {
        let id = ClusterId::generate(Path::new("/"));
        assert!(id.as_ref().starts_with("root-"));
    }
}
