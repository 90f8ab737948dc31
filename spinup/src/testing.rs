//! In-memory hypervisor and fixtures for tests.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use spinup_cmd::CommandError;
use spinup_machine::MachineSpec;
use spinup_system::{ClusterId, Hostname};
use spinup_virt::{DomainDescriptor, DomainState, Hypervisor, Lease, VirtError};

pub(crate) fn machine(cluster: &str, name: &str) -> MachineSpec {
    let mut spec = MachineSpec::new(0, ClusterId::from(format!("{cluster}-0123456789ab")));
    spec.name = name.to_owned();
    spec.hostname = Hostname::from(name.to_owned());
    spec.generate_instance_id();
    let domain = spec.domain_name();
    spec.disk_image = Some(PathBuf::from(format!("/var/lib/spinup/{domain}.qcow2")));
    spec.config_drive = Some(PathBuf::from(format!("/var/lib/spinup/{domain}-config.iso")));
    spec
}

#[derive(Debug)]
struct FakeDomain {
    xml: String,
    state: DomainState,
}

/// Keeps domains in memory and mimics `virsh` faults.
///
/// Started domains get a lease on the fake network for their first MAC when
/// `lease_address` is set.
#[derive(Debug, Default)]
pub(crate) struct FakeHypervisor {
    domains: Mutex<BTreeMap<String, FakeDomain>>,
    leases: Mutex<HashMap<String, Vec<Lease>>>,
    lease_address: Option<(String, IpAddr)>,
    calls: Mutex<Vec<String>>,
}

impl FakeHypervisor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Lease `127.0.0.1` on `network` to every domain that starts.
    pub(crate) fn with_loopback_leases(network: &str) -> Self {
        Self {
            lease_address: Some((network.to_owned(), IpAddr::V4(Ipv4Addr::LOCALHOST))),
            ..Self::default()
        }
    }

    pub(crate) fn set_state(&self, name: &str, state: DomainState) {
        if let Some(domain) = self.domains.lock().unwrap().get_mut(name) {
            domain.state = state;
        }
    }

    pub(crate) fn current_state(&self, name: &str) -> Option<DomainState> {
        self.domains.lock().unwrap().get(name).map(|domain| domain.state)
    }

    pub(crate) fn domain_names(&self) -> Vec<String> {
        self.domains.lock().unwrap().keys().cloned().collect()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn missing(name: &str) -> VirtError {
        VirtError::Command(CommandError::Failure {
            command: "virsh".to_owned(),
            stderr: format!("error: failed to get domain '{name}'"),
        })
    }

    fn stop(&self, name: &str) -> Result<(), VirtError> {
        let mut domains = self.domains.lock().unwrap();
        let domain = domains.get_mut(name).ok_or_else(|| Self::missing(name))?;
        if domain.state.is_stopped() {
            return Err(VirtError::NotRunning {
                domain: name.to_owned(),
            });
        }
        domain.state = DomainState::ShutOff;
        Ok(())
    }
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    async fn list_domains(&self) -> Result<Vec<String>, VirtError> {
        Ok(self.domain_names())
    }

    async fn define(&self, name: &str, xml: &str) -> Result<(), VirtError> {
        self.record(format!("define {name}"));
        self.domains.lock().unwrap().insert(
            name.to_owned(),
            FakeDomain {
                xml: xml.to_owned(),
                state: DomainState::ShutOff,
            },
        );
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), VirtError> {
        self.record(format!("start {name}"));
        let mac = {
            let mut domains = self.domains.lock().unwrap();
            let domain = domains.get_mut(name).ok_or_else(|| Self::missing(name))?;
            if domain.state.is_running() {
                return Err(VirtError::AlreadyRunning {
                    domain: name.to_owned(),
                });
            }
            domain.state = DomainState::Running;
            DomainDescriptor::parse(&domain.xml)?
                .primary_mac()
                .map(str::to_owned)
        };

        if let (Some((network, ip)), Some(mac)) = (&self.lease_address, mac) {
            self.leases
                .lock()
                .unwrap()
                .entry(network.clone())
                .or_default()
                .push(Lease {
                    mac,
                    ip: *ip,
                    hostname: None,
                });
        }
        Ok(())
    }

    async fn shutdown(&self, name: &str) -> Result<(), VirtError> {
        self.record(format!("shutdown {name}"));
        self.stop(name)
    }

    async fn destroy(&self, name: &str) -> Result<(), VirtError> {
        self.record(format!("destroy {name}"));
        self.stop(name)
    }

    async fn undefine(&self, name: &str) -> Result<(), VirtError> {
        self.record(format!("undefine {name}"));
        self.domains
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::missing(name))
    }

    async fn state(&self, name: &str) -> Result<DomainState, VirtError> {
        self.current_state(name).ok_or_else(|| Self::missing(name))
    }

    async fn dump_xml(&self, name: &str) -> Result<String, VirtError> {
        self.domains
            .lock()
            .unwrap()
            .get(name)
            .map(|domain| domain.xml.clone())
            .ok_or_else(|| Self::missing(name))
    }

    async fn leases(&self, network: &str) -> Result<Vec<Lease>, VirtError> {
        Ok(self
            .leases
            .lock()
            .unwrap()
            .get(network)
            .cloned()
            .unwrap_or_default())
    }
}
