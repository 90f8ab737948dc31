use std::path::PathBuf;

use roxmltree::{Document, Node};

use crate::VirtError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSource {
    /// `disk`, `cdrom`, ...
    pub device: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MetadataEntry {
    namespace: Option<String>,
    name: String,
    text: String,
}

/// The parts of a live domain descriptor callers care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDescriptor {
    pub name: String,
    pub uuid: Option<String>,
    pub mac_addresses: Vec<String>,
    pub disks: Vec<DiskSource>,
    metadata: Vec<MetadataEntry>,
}

impl DomainDescriptor {
    pub fn parse(xml: &str) -> Result<Self, VirtError> {
        let doc = Document::parse(xml).map_err(|error| VirtError::Xml {
            message: error.to_string(),
        })?;
        let root = doc.root_element();
        if root.tag_name().name() != "domain" {
            return Err(VirtError::Xml {
                message: format!("expected <domain>, found <{}>", root.tag_name().name()),
            });
        }

        let name = child(root, "name")
            .and_then(|node| node.text())
            .map(|text| text.trim().to_owned())
            .ok_or_else(|| VirtError::Xml {
                message: "domain has no <name>".to_owned(),
            })?;
        let uuid = child(root, "uuid")
            .and_then(|node| node.text())
            .map(|text| text.trim().to_owned());

        let mut mac_addresses = Vec::new();
        let mut disks = Vec::new();
        if let Some(devices) = child(root, "devices") {
            for device in devices.children().filter(Node::is_element) {
                match device.tag_name().name() {
                    "interface" => {
                        if let Some(mac) = child(device, "mac").and_then(|mac| mac.attribute("address"))
                        {
                            mac_addresses.push(mac.to_ascii_lowercase());
                        }
                    }
                    "disk" => {
                        let file = child(device, "source").and_then(|source| source.attribute("file"));
                        if let Some(file) = file {
                            disks.push(DiskSource {
                                device: device.attribute("device").unwrap_or("disk").to_owned(),
                                file: PathBuf::from(file),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        let metadata = child(root, "metadata")
            .map(|metadata| {
                metadata
                    .descendants()
                    .filter(|node| node.is_element() && node.id() != metadata.id())
                    .filter(|node| !node.children().any(|child| child.is_element()))
                    .map(|node| MetadataEntry {
                        namespace: node.tag_name().namespace().map(str::to_owned),
                        name: node.tag_name().name().to_owned(),
                        text: node.text().unwrap_or_default().to_owned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(DomainDescriptor {
            name,
            uuid,
            mac_addresses,
            disks,
            metadata,
        })
    }

    /// Text of the first `<metadata>` leaf element with this namespace and local name.
    pub fn metadata_value(&self, namespace: &str, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|entry| entry.namespace.as_deref() == Some(namespace) && entry.name == name)
            .map(|entry| entry.text.as_str())
    }

    pub fn primary_mac(&self) -> Option<&str> {
        self.mac_addresses.first().map(String::as_str)
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "https://spinup.dev/xmlns/cluster/1";

    const XML: &str = r#"<domain type='kvm' id='3'>
  <name>lab-0123456789ab-db1</name>
  <uuid>5b2e6b3c-8f1d-4d6a-9a51-2c1f0e7c9d11</uuid>
  <title>db1</title>
  <metadata>
    <other:thing xmlns:other="https://example.org/other">ignored</other:thing>
    <spinup:cluster xmlns:spinup="https://spinup.dev/xmlns/cluster/1">
      <spinup:path>/home/ada/lab &amp; co</spinup:path>
      <spinup:machine>eyJ2ZXJzaW9uIjoxfQ==</spinup:machine>
    </spinup:cluster>
  </metadata>
  <memory unit='KiB'>2097152</memory>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='/var/lib/spinup/lab-0123456789ab-db1.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <source file='/var/lib/spinup/lab-0123456789ab-db1-config.iso'/>
      <target dev='sda' bus='sata'/>
      <readonly/>
    </disk>
    <interface type='network'>
      <mac address='52:54:00:AB:cd:ef'/>
      <source network='default'/>
    </interface>
  </devices>
</domain>"#;

    #[test]
    fn parses_live_descriptor() {
        let descriptor = DomainDescriptor::parse(XML).unwrap();
        assert_eq!(descriptor.name, "lab-0123456789ab-db1");
        assert_eq!(
            descriptor.uuid.as_deref(),
            Some("5b2e6b3c-8f1d-4d6a-9a51-2c1f0e7c9d11")
        );
        assert_eq!(descriptor.primary_mac(), Some("52:54:00:ab:cd:ef"));
        assert_eq!(descriptor.disks.len(), 2);
        assert_eq!(descriptor.disks[1].device, "cdrom");
        assert_eq!(
            descriptor.disks[0].file,
            PathBuf::from("/var/lib/spinup/lab-0123456789ab-db1.qcow2")
        );
    }

    #[test]
    fn reads_namespaced_metadata() {
        let descriptor = DomainDescriptor::parse(XML).unwrap();
        assert_eq!(descriptor.metadata_value(NS, "path"), Some("/home/ada/lab & co"));
        assert_eq!(
            descriptor.metadata_value(NS, "machine"),
            Some("eyJ2ZXJzaW9uIjoxfQ==")
        );
        assert_eq!(descriptor.metadata_value(NS, "thing"), None);
        assert_eq!(
            descriptor.metadata_value("https://example.org/other", "thing"),
            Some("ignored")
        );
    }

    #[test]
    fn metadata_text_is_verbatim() {
        let xml = format!(
            "<domain><name>x</name><metadata><s:cluster xmlns:s=\"{NS}\"><s:path> /srv/lab </s:path></s:cluster></metadata></domain>"
        );
        let descriptor = DomainDescriptor::parse(&xml).unwrap();
        assert_eq!(descriptor.metadata_value(NS, "path"), Some(" /srv/lab "));
    }

    #[test]
    fn no_metadata() {
        let descriptor = DomainDescriptor::parse("<domain><name>plain</name></domain>").unwrap();
        assert_eq!(descriptor.metadata_value(NS, "path"), None);
        assert!(descriptor.disks.is_empty());
        assert_eq!(descriptor.primary_mac(), None);
    }

    #[test]
    fn rejects_invalid_xml() {
        assert!(matches!(
            DomainDescriptor::parse("<domain><name>x</domain>"),
            Err(VirtError::Xml { .. })
        ));
        assert!(matches!(
            DomainDescriptor::parse("<network><name>x</name></network>"),
            Err(VirtError::Xml { .. })
        ));
    }
}
