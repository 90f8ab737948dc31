use std::path::{Path, PathBuf};

use quick_xml::escape::escape;
use spinup_machine::{MachineRecordError, MachineSpec, decode_machine, encode_machine};
use spinup_virt::{DomainDescriptor, Hypervisor, VirtError};
use thiserror::Error;
use tracing::debug;

pub const METADATA_NAMESPACE: &str = "https://spinup.dev/xmlns/cluster/1";
const METADATA_PREFIX: &str = "spinup";

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("no cluster found for {}", path.display())]
    NoCluster { path: PathBuf },

    #[error("no machine named '{name}' in this cluster")]
    NoMachine { name: String },

    #[error("cluster has several machines, choose one of: {}", names.join(", "))]
    AmbiguousTarget { names: Vec<String> },

    #[error("domain '{domain}' has no network interface")]
    NoInterface { domain: String },

    #[error("no address leased to domain '{domain}'")]
    NoLease { domain: String },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("cluster already running for {}", path.display())]
    AlreadyRunning { path: PathBuf },

    #[error("domain '{domain}' belongs to this cluster but has no machine record")]
    MissingRecord { domain: String },

    #[error("cannot decode machine record of domain '{domain}': {source}")]
    Decode {
        domain: String,
        #[source]
        source: MachineRecordError,
    },

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Virt(#[from] VirtError),
}

/// One machine of a discovered cluster.
#[derive(Debug, Clone)]
pub struct ClusterMember {
    pub spec: MachineSpec,
    /// Live descriptor as read during discovery.
    pub descriptor: DomainDescriptor,
}

impl ClusterMember {
    pub fn domain(&self) -> &str {
        &self.descriptor.name
    }
}

/// Machines whose metadata names the same source directory.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub path: PathBuf,
    pub members: Vec<ClusterMember>,
}

impl Cluster {
    /// Every member, or just the one called `name`.
    pub fn select(&self, name: Option<&str>) -> Result<Vec<&ClusterMember>, LookupError> {
        match name {
            None => Ok(self.members.iter().collect()),
            Some(name) => self.find(name).map(|member| vec![member]),
        }
    }

    /// Exactly one member: `name` if given, otherwise the only machine.
    pub fn single(&self, name: Option<&str>) -> Result<&ClusterMember, LookupError> {
        match (name, self.members.as_slice()) {
            (Some(name), _) => self.find(name),
            (None, [only]) => Ok(only),
            (None, members) => Err(LookupError::AmbiguousTarget {
                names: members.iter().map(|member| member.spec.name.clone()).collect(),
            }),
        }
    }

    fn find(&self, name: &str) -> Result<&ClusterMember, LookupError> {
        self.members
            .iter()
            .find(|member| member.spec.name == name || member.domain() == name)
            .ok_or_else(|| LookupError::NoMachine {
                name: name.to_owned(),
            })
    }
}

/// Scan every domain on the hypervisor for members of the cluster created from `source_dir`.
pub async fn discover(
    hypervisor: &dyn Hypervisor,
    source_dir: &Path,
) -> Result<Option<Cluster>, RegistryError> {
    let wanted = source_dir.to_string_lossy();
    let mut members = Vec::new();

    for domain in hypervisor.list_domains().await? {
        let descriptor = hypervisor.descriptor(&domain).await?;
        let Some(path) = descriptor.metadata_value(METADATA_NAMESPACE, "path") else {
            continue;
        };
        if path != wanted {
            continue;
        }

        let record = descriptor
            .metadata_value(METADATA_NAMESPACE, "machine")
            .ok_or_else(|| RegistryError::MissingRecord {
                domain: domain.clone(),
            })?;
        let spec = decode_machine(record).map_err(|source| RegistryError::Decode {
            domain: domain.clone(),
            source,
        })?;
        debug!("found {} in cluster {}", domain, spec.cluster_id);
        members.push(ClusterMember { spec, descriptor });
    }

    if members.is_empty() {
        return Ok(None);
    }
    members.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
    Ok(Some(Cluster {
        path: source_dir.to_path_buf(),
        members,
    }))
}

/// Like [`discover`], but a missing cluster is an error.
pub async fn require(
    hypervisor: &dyn Hypervisor,
    source_dir: &Path,
) -> Result<Cluster, RegistryError> {
    discover(hypervisor, source_dir)
        .await?
        .ok_or_else(|| {
            RegistryError::from(LookupError::NoCluster {
                path: source_dir.to_path_buf(),
            })
        })
}

/// Fails if a cluster already exists for `source_dir`.
pub async fn ensure_absent(
    hypervisor: &dyn Hypervisor,
    source_dir: &Path,
) -> Result<(), RegistryError> {
    match discover(hypervisor, source_dir).await? {
        Some(_) => Err(RegistryError::AlreadyRunning {
            path: source_dir.to_path_buf(),
        }),
        None => Ok(()),
    }
}

/// The `<metadata>` child that ties a domain to its cluster.
pub fn render_metadata(source_dir: &Path, spec: &MachineSpec) -> Result<String, MachineRecordError> {
    let path = source_dir.to_string_lossy();
    let record = encode_machine(spec)?;
    Ok(format!(
        "<{p}:cluster xmlns:{p}=\"{ns}\">\n      <{p}:path>{path}</{p}:path>\n      <{p}:machine>{record}</{p}:machine>\n    </{p}:cluster>",
        p = METADATA_PREFIX,
        ns = METADATA_NAMESPACE,
        path = escape(&*path),
    ))
}
