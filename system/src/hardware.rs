use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BYTES_PER_MIB: u64 = 1 << 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("cpu count must be at least 1")]
    ZeroCpus,

    #[error("memory must be at least 1 MiB, got {bytes} bytes")]
    MemoryTooSmall { bytes: u64 },

    #[error("memory size overflows: {quantity} x {multiplier}")]
    MemoryOverflow { quantity: u64, multiplier: u64 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct CpuCount(u16);

impl CpuCount {
    pub fn new(count: u16) -> Result<Self, HardwareError> {
        if count == 0 {
            return Err(HardwareError::ZeroCpus);
        }
        Ok(Self(count))
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl Default for CpuCount {
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<u16> for CpuCount {
    type Error = HardwareError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CpuCount> for u16 {
    fn from(value: CpuCount) -> Self {
        value.0
    }
}

impl Display for CpuCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Memory in whole mebibytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct MemorySize(u64);

impl MemorySize {
    pub fn from_mib(mib: u64) -> Result<Self, HardwareError> {
        if mib == 0 {
            return Err(HardwareError::MemoryTooSmall { bytes: 0 });
        }
        Ok(Self(mib))
    }

    /// Truncates to whole MiB; anything under 1 MiB is rejected.
    pub fn from_bytes(bytes: u64) -> Result<Self, HardwareError> {
        if bytes < BYTES_PER_MIB {
            return Err(HardwareError::MemoryTooSmall { bytes });
        }
        Ok(Self(bytes / BYTES_PER_MIB))
    }

    pub fn from_quantity(quantity: u64, unit: MemoryUnit) -> Result<Self, HardwareError> {
        let multiplier = unit.multiplier();
        let bytes = quantity
            .checked_mul(multiplier)
            .ok_or(HardwareError::MemoryOverflow {
                quantity,
                multiplier,
            })?;
        Self::from_bytes(bytes)
    }

    pub fn as_mib(&self) -> u64 {
        self.0
    }
}

impl Default for MemorySize {
    fn default() -> Self {
        Self(1024)
    }
}

impl TryFrom<u64> for MemorySize {
    type Error = HardwareError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_mib(value)
    }
}

impl From<MemorySize> for u64 {
    fn from(value: MemorySize) -> Self {
        value.0
    }
}

impl Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} MiB", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryUnit {
    Bytes,
    Kibi,
    Mebi,
    Gibi,
    Tebi,
}

impl MemoryUnit {
    /// Accepts `B`, `K`, `M`, `G`, `T` in any case, with an optional `B` or `iB` tail.
    pub fn parse(unit: &str) -> Option<Self> {
        let unit = unit.to_ascii_uppercase();
        let head = match unit.as_str() {
            "B" => return Some(MemoryUnit::Bytes),
            other => other
                .strip_suffix("IB")
                .or_else(|| other.strip_suffix('B'))
                .unwrap_or(other),
        };
        match head {
            "K" => Some(MemoryUnit::Kibi),
            "M" => Some(MemoryUnit::Mebi),
            "G" => Some(MemoryUnit::Gibi),
            "T" => Some(MemoryUnit::Tebi),
            _ => None,
        }
    }

    pub fn multiplier(&self) -> u64 {
        match self {
            MemoryUnit::Bytes => 1,
            MemoryUnit::Kibi => 1 << 10,
            MemoryUnit::Mebi => 1 << 20,
            MemoryUnit::Gibi => 1 << 30,
            MemoryUnit::Tebi => 1 << 40,
        }
    }
}
