mod descriptor;
mod lease;
mod state;
mod virsh;

use async_trait::async_trait;
use spinup_cmd::CommandError;
use spinup_fs::FsError;
use thiserror::Error;

pub use crate::descriptor::{DiskSource, DomainDescriptor};
pub use crate::lease::Lease;
pub use crate::state::DomainState;
pub use crate::virsh::Virsh;

#[derive(Error, Debug)]
pub enum VirtError {
    #[error("domain '{domain}' is not running")]
    NotRunning { domain: String },

    #[error("domain '{domain}' is already running")]
    AlreadyRunning { domain: String },

    #[error("invalid domain descriptor: {message}")]
    Xml { message: String },

    #[error("cannot read domain state from: {output}")]
    ParseState { output: String },

    #[error("unknown domain state code {code}")]
    UnknownState { code: u32 },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Operations spinup needs from a hypervisor connection.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Names of every domain, running or not.
    async fn list_domains(&self) -> Result<Vec<String>, VirtError>;

    async fn define(&self, name: &str, xml: &str) -> Result<(), VirtError>;

    /// Fails with [`VirtError::AlreadyRunning`] if the domain is active.
    async fn start(&self, name: &str) -> Result<(), VirtError>;

    /// Ask the guest to power off. Fails with [`VirtError::NotRunning`] if it is not active.
    async fn shutdown(&self, name: &str) -> Result<(), VirtError>;

    /// Pull the plug. Fails with [`VirtError::NotRunning`] if it is not active.
    async fn destroy(&self, name: &str) -> Result<(), VirtError>;

    async fn undefine(&self, name: &str) -> Result<(), VirtError>;

    async fn state(&self, name: &str) -> Result<DomainState, VirtError>;

    async fn dump_xml(&self, name: &str) -> Result<String, VirtError>;

    async fn leases(&self, network: &str) -> Result<Vec<Lease>, VirtError>;

    async fn descriptor(&self, name: &str) -> Result<DomainDescriptor, VirtError> {
        let xml = self.dump_xml(name).await?;
        DomainDescriptor::parse(&xml)
    }
}
