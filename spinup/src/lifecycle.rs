use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use comfy_table::Table;
use spinup_ctx::Config;
use spinup_fs::{self as fs, FsError};
use spinup_machine::MachineSpec;
use spinup_virt::{DomainState, Hypervisor, VirtError};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{TemplateError, render_domain};
use crate::images::{ImageCache, ImageError};
use crate::probe::{Deadline, ProbeError, Prober};
use crate::provision::{ProvisionError, Provisioner};
use crate::registry::{self, Cluster, LookupError, RegistryError};

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Image(#[from] Arc<ImageError>),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Virt(#[from] VirtError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error("timed out waiting for {} to be {state}", domains.join(", "))]
    Timeout {
        domains: Vec<String>,
        state: &'static str,
    },

    #[error("{failed} of {total} machines failed")]
    Failed { failed: usize, total: usize },
}

/// One line of `status` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineStatus {
    pub name: String,
    pub domain: String,
    pub state: DomainState,
    pub spec: MachineSpec,
}

/// Drives domains through create, start, shutdown and destroy.
#[derive(Clone)]
pub struct Lifecycle {
    hypervisor: Arc<dyn Hypervisor>,
    source_dir: PathBuf,
    network: String,
    ssh_port: u16,
    poll_interval: Duration,
    wait_timeout: Option<Duration>,
}

impl Lifecycle {
    pub fn new(hypervisor: Arc<dyn Hypervisor>, source_dir: PathBuf, config: &Config) -> Self {
        Self {
            hypervisor,
            source_dir,
            network: config.network.clone(),
            ssh_port: config.ssh_port,
            poll_interval: config.poll_interval,
            wait_timeout: config.wait_timeout,
        }
    }

    pub fn hypervisor(&self) -> &dyn Hypervisor {
        self.hypervisor.as_ref()
    }

    /// The cluster created from this source directory.
    pub async fn cluster(&self) -> Result<Cluster, RegistryError> {
        registry::require(self.hypervisor(), &self.source_dir).await
    }

    fn prober(&self) -> Prober<'_> {
        Prober::new(
            self.hypervisor.as_ref(),
            &self.network,
            self.ssh_port,
            self.poll_interval,
            self.wait_timeout,
        )
    }

    /// Provision, define, start and probe every machine concurrently.
    ///
    /// Every machine runs to completion; the batch fails if any one did.
    /// Nothing is rolled back. The image cache is told to stop once all
    /// machines are done with it.
    pub async fn create(
        &self,
        specs: Vec<MachineSpec>,
        images: &ImageCache,
        provisioner: Arc<Provisioner>,
    ) -> Result<Vec<(String, SocketAddr)>, LifecycleError> {
        let result = self.create_all(specs, images, provisioner).await;
        images.shutdown();
        result
    }

    async fn create_all(
        &self,
        specs: Vec<MachineSpec>,
        images: &ImageCache,
        provisioner: Arc<Provisioner>,
    ) -> Result<Vec<(String, SocketAddr)>, LifecycleError> {
        registry::ensure_absent(self.hypervisor(), &self.source_dir).await?;

        let total = specs.len();
        let mut tasks = JoinSet::new();
        for spec in specs {
            let lifecycle = self.clone();
            let images = images.clone();
            let provisioner = provisioner.clone();
            tasks.spawn(async move {
                let name = spec.name.clone();
                let result = lifecycle.create_machine(spec, &images, &provisioner).await;
                (name, result)
            });
        }

        let mut ready = Vec::new();
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            let (name, result) = joined?;
            match result {
                Ok(addr) => {
                    info!("{name} ready at {addr}");
                    ready.push((name, addr));
                }
                Err(err) => {
                    error!("{name}: {err}");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(LifecycleError::Failed { failed, total });
        }
        ready.sort();
        Ok(ready)
    }

    #[instrument(skip_all, fields(machine = %spec.name))]
    async fn create_machine(
        &self,
        mut spec: MachineSpec,
        images: &ImageCache,
        provisioner: &Provisioner,
    ) -> Result<SocketAddr, LifecycleError> {
        let image = images.get_image(spec.os_type, spec.os_variant).await?;
        provisioner.provision(&mut spec, &image).await?;

        let domain = spec.domain_name();
        let xml = render_domain(&spec, &self.source_dir, &self.network)?;
        self.hypervisor.define(&domain, &xml).await?;
        info!("defined domain {domain}");

        self.request_start(&domain).await?;
        Ok(self.prober().wait_ready(&domain).await?)
    }

    /// Stop, undefine and delete the artifacts of every cluster member concurrently.
    pub async fn destroy(&self, cluster: &Cluster) -> Result<(), LifecycleError> {
        let total = cluster.members.len();
        let mut tasks = JoinSet::new();
        for member in &cluster.members {
            let lifecycle = self.clone();
            let domain = member.domain().to_owned();
            tasks.spawn(async move {
                let result = lifecycle.destroy_domain(&domain).await;
                (domain, result)
            });
        }

        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            let (domain, result) = joined?;
            match result {
                Ok(()) => info!("destroyed {domain}"),
                Err(err) => {
                    error!("{domain}: {err}");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(LifecycleError::Failed { failed, total });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn destroy_domain(&self, domain: &str) -> Result<(), LifecycleError> {
        let descriptor = self.hypervisor.descriptor(domain).await?;

        match self.hypervisor.destroy(domain).await {
            Ok(()) => {}
            Err(VirtError::NotRunning { .. }) => debug!("{domain} already stopped"),
            Err(err) => return Err(err.into()),
        }
        self.hypervisor.undefine(domain).await?;

        for disk in &descriptor.disks {
            if fs::remove_file_if_exists(&disk.file).await? {
                debug!("removed {}", disk.file.display());
            }
        }
        Ok(())
    }

    /// Start the selected machines and wait until all of them are running.
    pub async fn start(&self, cluster: &Cluster, name: Option<&str>) -> Result<(), LifecycleError> {
        let domains = target_domains(cluster, name)?;
        for domain in &domains {
            self.request_start(domain).await?;
        }
        self.wait_for_state(&domains, DomainState::is_running, "running")
            .await
    }

    /// Ask the selected machines to power off and wait until all of them have.
    pub async fn shutdown(&self, cluster: &Cluster, name: Option<&str>) -> Result<(), LifecycleError> {
        let domains = target_domains(cluster, name)?;
        for domain in &domains {
            match self.hypervisor.shutdown(domain).await {
                Ok(()) => info!("shutting down {domain}"),
                Err(VirtError::NotRunning { .. }) => warn!("{domain} is not running"),
                Err(err) => return Err(err.into()),
            }
        }
        self.wait_for_state(&domains, DomainState::is_stopped, "shut off")
            .await
    }

    pub async fn status(
        &self,
        cluster: &Cluster,
        name: Option<&str>,
    ) -> Result<Vec<MachineStatus>, LifecycleError> {
        let mut statuses = Vec::new();
        for member in cluster.select(name)? {
            let state = self.hypervisor.state(member.domain()).await?;
            statuses.push(MachineStatus {
                name: member.spec.name.clone(),
                domain: member.domain().to_owned(),
                state,
                spec: member.spec.clone(),
            });
        }
        Ok(statuses)
    }

    async fn request_start(&self, domain: &str) -> Result<(), LifecycleError> {
        match self.hypervisor.start(domain).await {
            Ok(()) => info!("started {domain}"),
            Err(VirtError::AlreadyRunning { .. }) => warn!("{domain} is already running"),
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    async fn wait_for_state(
        &self,
        domains: &[String],
        reached: fn(&DomainState) -> bool,
        label: &'static str,
    ) -> Result<(), LifecycleError> {
        let deadline = Deadline::after(self.wait_timeout);
        loop {
            let mut pending = Vec::new();
            for domain in domains {
                let state = self.hypervisor.state(domain).await?;
                if !reached(&state) {
                    debug!("{domain} is {state}, waiting for {label}");
                    pending.push(domain.clone());
                }
            }
            if pending.is_empty() {
                return Ok(());
            }
            if deadline.passed() {
                return Err(LifecycleError::Timeout {
                    domains: pending,
                    state: label,
                });
            }
            sleep(self.poll_interval).await;
        }
    }
}

fn target_domains(cluster: &Cluster, name: Option<&str>) -> Result<Vec<String>, LookupError> {
    Ok(cluster
        .select(name)?
        .into_iter()
        .map(|member| member.domain().to_owned())
        .collect())
}

pub fn status_table(statuses: &[MachineStatus]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .set_content_arrangement(comfy_table::ContentArrangement::Dynamic)
        .set_header(vec!["name", "domain", "state", "variant", "memory", "cpus"]);

    for status in statuses {
        table.add_row(vec![
            status.name.clone(),
            status.domain.clone(),
            status.state.to_string(),
            status.spec.os_variant.to_string(),
            status.spec.memory.to_string(),
            status.spec.cpus.to_string(),
        ]);
    }
    table
}
