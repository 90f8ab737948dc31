use std::path::PathBuf;

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use spinup_system::{
    ClusterId, CpuCount, HardwareError, Hostname, MemorySize, OsError, OsType, OsVariant,
};
use thiserror::Error;
use uuid::Uuid;

use crate::MachineSpec;

pub const MACHINE_RECORD_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum MachineRecordError {
    #[error("machine record is not valid base64: {0}")]
    Base64(base64ct::Error),

    #[error("machine record is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("machine record has no schema version")]
    MissingVersion,

    #[error("unsupported machine record version {found} (expected {})", MACHINE_RECORD_VERSION)]
    UnsupportedVersion { found: u64 },

    #[error(transparent)]
    Os(#[from] OsError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

/// Wire shape of a [`MachineSpec`] as stored in domain metadata.
///
/// Enumerations are stored as their keywords and re-validated on read, so a
/// record written by a newer build with a variant this build does not know
/// fails loudly instead of decoding to something else.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct MachineRecordV1 {
    version: u32,
    uuid: Uuid,
    name: String,
    cluster_id: String,
    instance_id: Option<String>,
    description: String,
    os_type: String,
    os_variant: String,
    memory_mib: u64,
    cpus: u16,
    hostname: String,
    disk_image: Option<PathBuf>,
    config_drive: Option<PathBuf>,
}

impl From<&MachineSpec> for MachineRecordV1 {
    fn from(spec: &MachineSpec) -> Self {
        Self {
            version: MACHINE_RECORD_VERSION,
            uuid: spec.uuid,
            name: spec.name.clone(),
            cluster_id: spec.cluster_id.to_string(),
            instance_id: spec.instance_id.clone(),
            description: spec.description.clone(),
            os_type: spec.os_type.to_string(),
            os_variant: spec.os_variant.to_string(),
            memory_mib: spec.memory.as_mib(),
            cpus: spec.cpus.get(),
            hostname: spec.hostname.to_string(),
            disk_image: spec.disk_image.clone(),
            config_drive: spec.config_drive.clone(),
        }
    }
}

impl TryFrom<MachineRecordV1> for MachineSpec {
    type Error = MachineRecordError;

    fn try_from(record: MachineRecordV1) -> Result<Self, Self::Error> {
        let MachineRecordV1 {
            version: _,
            uuid,
            name,
            cluster_id,
            instance_id,
            description,
            os_type,
            os_variant,
            memory_mib,
            cpus,
            hostname,
            disk_image,
            config_drive,
        } = record;

        Ok(MachineSpec {
            uuid,
            name,
            cluster_id: ClusterId::from(cluster_id),
            instance_id,
            description,
            os_type: os_type.parse::<OsType>()?,
            os_variant: os_variant.parse::<OsVariant>()?,
            memory: MemorySize::from_mib(memory_mib)?,
            cpus: CpuCount::new(cpus)?,
            hostname: Hostname::from(hostname),
            disk_image,
            config_drive,
        })
    }
}

pub fn encode_machine(spec: &MachineSpec) -> Result<String, MachineRecordError> {
    let json = serde_json::to_vec(&MachineRecordV1::from(spec))?;
    Ok(Base64::encode_string(&json))
}

pub fn decode_machine(encoded: &str) -> Result<MachineSpec, MachineRecordError> {
    let json = Base64::decode_vec(encoded.trim()).map_err(MachineRecordError::Base64)?;

    // Check the version before committing to a schema.
    let value: serde_json::Value = serde_json::from_slice(&json)?;
    let version = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or(MachineRecordError::MissingVersion)?;
    if version != u64::from(MACHINE_RECORD_VERSION) {
        return Err(MachineRecordError::UnsupportedVersion { found: version });
    }

    let record: MachineRecordV1 = serde_json::from_value(value)?;
    MachineSpec::try_from(record)
}
