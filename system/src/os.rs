use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    #[default]
    Linux,
}

impl Display for OsType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OsType::Linux => write!(f, "linux"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OsError {
    #[error("unknown os type: {0}")]
    UnknownOsType(String),

    #[error("unknown os variant: {0}")]
    UnknownOsVariant(String),
}

impl FromStr for OsType {
    type Err = OsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(OsType::Linux),
            other => Err(OsError::UnknownOsType(other.to_owned())),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsVariant {
    #[default]
    Ubuntu,
    Debian,
    Fedora,
    Centos,
    Coreos,
}

impl OsVariant {
    pub const ALL: [OsVariant; 5] = [
        OsVariant::Ubuntu,
        OsVariant::Debian,
        OsVariant::Fedora,
        OsVariant::Centos,
        OsVariant::Coreos,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            OsVariant::Ubuntu => "ubuntu",
            OsVariant::Debian => "debian",
            OsVariant::Fedora => "fedora",
            OsVariant::Centos => "centos",
            OsVariant::Coreos => "coreos",
        }
    }

    pub fn os_type(&self) -> OsType {
        OsType::Linux
    }
}

impl Display for OsVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for OsVariant {
    type Err = OsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OsVariant::ALL
            .into_iter()
            .find(|variant| variant.keyword() == s)
            .ok_or_else(|| OsError::UnknownOsVariant(s.to_owned()))
    }
}
