use std::path::Path;

use quick_xml::escape::escape;
use spinup_machine::{MachineRecordError, MachineSpec};
use thiserror::Error;

use crate::registry::render_metadata;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("machine '{name}' has no {artifact} yet")]
    MissingArtifact { name: String, artifact: &'static str },

    #[error(transparent)]
    Record(#[from] MachineRecordError),
}

/// Render the libvirt domain descriptor for a provisioned machine.
pub fn render_domain(
    spec: &MachineSpec,
    source_dir: &Path,
    network: &str,
) -> Result<String, TemplateError> {
    let disk = spec
        .disk_image
        .as_deref()
        .ok_or_else(|| TemplateError::MissingArtifact {
            name: spec.name.clone(),
            artifact: "disk image",
        })?;
    let config_drive = spec
        .config_drive
        .as_deref()
        .ok_or_else(|| TemplateError::MissingArtifact {
            name: spec.name.clone(),
            artifact: "config drive",
        })?;
    let metadata = render_metadata(source_dir, spec)?;

    let name = spec.domain_name();
    let uuid = spec.uuid.hyphenated().to_string();
    let disk = disk.to_string_lossy();
    let config_drive = config_drive.to_string_lossy();

    Ok(format!(
        r#"<domain type='kvm'>
  <name>{name}</name>
  <uuid>{uuid}</uuid>
  <title>{title}</title>
  <description>{description}</description>
  <metadata>
    {metadata}
  </metadata>
  <memory unit='MiB'>{memory}</memory>
  <currentMemory unit='MiB'>{memory}</currentMemory>
  <vcpu placement='static'>{cpus}</vcpu>
  <os>
    <type arch='x86_64' machine='pc'>hvm</type>
    <boot dev='hd'/>
  </os>
  <features>
    <acpi/>
    <apic/>
  </features>
  <cpu mode='host-passthrough'/>
  <clock offset='utc'/>
  <on_poweroff>destroy</on_poweroff>
  <on_reboot>restart</on_reboot>
  <on_crash>destroy</on_crash>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='{disk}'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <driver name='qemu' type='raw'/>
      <source file='{config_drive}'/>
      <target dev='sda' bus='sata'/>
      <readonly/>
    </disk>
    <interface type='network'>
      <mac address='{mac}'/>
      <source network='{network}'/>
      <model type='virtio'/>
    </interface>
    <serial type='pty'>
      <target port='0'/>
    </serial>
    <console type='pty'>
      <target type='serial' port='0'/>
    </console>
    <rng model='virtio'>
      <backend model='random'>/dev/urandom</backend>
    </rng>
  </devices>
</domain>
"#,
        name = escape(name.as_str()),
        title = escape(spec.name.as_str()),
        description = escape(spec.description.as_str()),
        memory = spec.memory.as_mib(),
        cpus = spec.cpus.get(),
        disk = escape(&*disk),
        config_drive = escape(&*config_drive),
        mac = spec.mac_address(),
        network = escape(network),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::METADATA_NAMESPACE;
    use crate::testing::machine;
    use spinup_machine::decode_machine;
    use spinup_virt::DomainDescriptor;
    use std::path::PathBuf;

    #[test]
    fn descriptor_carries_machine() {
        let mut spec = machine("lab", "db1");
        spec.description = "primary <db> & 'replica'".to_owned();
        let source_dir = Path::new("/home/ada/R&D <lab>");
        let xml = render_domain(&spec, source_dir, "default").unwrap();

        let descriptor = DomainDescriptor::parse(&xml).unwrap();
        assert_eq!(descriptor.name, spec.domain_name());
        assert_eq!(descriptor.uuid, Some(spec.uuid.to_string()));
        assert_eq!(
            descriptor.metadata_value(METADATA_NAMESPACE, "path"),
            Some("/home/ada/R&D <lab>")
        );
        let record = descriptor
            .metadata_value(METADATA_NAMESPACE, "machine")
            .unwrap();
        assert_eq!(decode_machine(record).unwrap(), spec);

        let files: Vec<PathBuf> = descriptor.disks.iter().map(|d| d.file.clone()).collect();
        assert_eq!(
            files,
            [
                spec.disk_image.clone().unwrap(),
                spec.config_drive.clone().unwrap()
            ]
        );
    }

    #[test]
    fn sizes_are_in_mebibytes() {
        let spec = machine("lab", "web");
        let xml = render_domain(&spec, Path::new("/srv"), "isolated").unwrap();
        assert!(xml.contains("<memory unit='MiB'>1024</memory>"));
        assert!(xml.contains("<vcpu placement='static'>1</vcpu>"));
        assert!(xml.contains("<source network='isolated'/>"));
    }

    #[test]
    fn mac_is_stable_per_machine() {
        let spec = machine("lab", "web");
        let xml = render_domain(&spec, Path::new("/srv"), "default").unwrap();
        let descriptor = DomainDescriptor::parse(&xml).unwrap();
        let mac = spec.mac_address();
        assert_eq!(descriptor.primary_mac(), Some(mac.as_str()));
        assert!(mac.starts_with("52:54:00:"));
        assert_eq!(mac.len(), 17);
    }

    #[test]
    fn requires_artifacts() {
        let mut spec = machine("lab", "web");
        spec.config_drive = None;
        assert!(matches!(
            render_domain(&spec, Path::new("/srv"), "default"),
            Err(TemplateError::MissingArtifact {
                artifact: "config drive",
                ..
            })
        ));
    }
}
