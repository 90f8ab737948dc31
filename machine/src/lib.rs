mod record;

use std::path::PathBuf;

use spinup_system::{ClusterId, CpuCount, Hostname, MemorySize, OsType, OsVariant};
use uuid::Uuid;

pub use crate::record::{MACHINE_RECORD_VERSION, MachineRecordError, decode_machine, encode_machine};

/// Everything needed to provision, define and later rediscover one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSpec {
    pub uuid: Uuid,
    pub name: String,
    pub cluster_id: ClusterId,
    /// Assigned during provisioning.
    pub instance_id: Option<String>,
    pub description: String,
    pub os_type: OsType,
    pub os_variant: OsVariant,
    pub memory: MemorySize,
    pub cpus: CpuCount,
    pub hostname: Hostname,
    pub disk_image: Option<PathBuf>,
    pub config_drive: Option<PathBuf>,
}

impl MachineSpec {
    pub fn new(index: usize, cluster_id: ClusterId) -> Self {
        let name = format!("machine-{}", index + 1);
        Self {
            uuid: Uuid::new_v4(),
            hostname: Hostname::from(name.clone()),
            name,
            cluster_id,
            instance_id: None,
            description: String::new(),
            os_type: OsType::default(),
            os_variant: OsVariant::default(),
            memory: MemorySize::default(),
            cpus: CpuCount::default(),
            disk_image: None,
            config_drive: None,
        }
    }

    /// Name of the hypervisor domain backing this machine.
    pub fn domain_name(&self) -> String {
        format!("{}-{}", self.cluster_id, self.name)
    }

    /// Locally administered QEMU/KVM address derived from the uuid.
    ///
    /// Only 24 bits vary, so callers placing several machines on one network
    /// should check for repeats and [`MachineSpec::regenerate_uuid`].
    pub fn mac_address(&self) -> String {
        let bytes = self.uuid.as_bytes();
        format!("52:54:00:{:02x}:{:02x}:{:02x}", bytes[0], bytes[1], bytes[2])
    }

    pub fn regenerate_uuid(&mut self) {
        self.uuid = Uuid::new_v4();
    }

    pub fn generate_instance_id(&mut self) -> &str {
        self.instance_id
            .get_or_insert_with(|| format!("iid-{}", Uuid::new_v4().simple()))
    }
}
