use async_trait::async_trait;
use spinup_cmd::Command;
use spinup_fs as fs;
use std::path::PathBuf;
use tracing::debug;

use crate::lease::parse_leases;
use crate::state::parse_domstats;
use crate::{DomainState, Hypervisor, Lease, VirtError};

/// [`Hypervisor`] backed by the `virsh` command line client.
///
/// Every call is its own `virsh -c <uri>` process, and so its own connection.
#[derive(Debug, Clone)]
pub struct Virsh {
    connect_uri: String,
    scratch_dir: PathBuf,
}

impl Virsh {
    /// `scratch_dir` holds descriptors while they are being defined.
    pub fn new(connect_uri: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            connect_uri: connect_uri.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new("virsh");
        command.args(["-c", &self.connect_uri]);
        command
    }

    async fn stdout(&self, args: &[&str]) -> Result<String, VirtError> {
        let output = self.command().args(args).run().await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn is_not_running(stderr: &str) -> bool {
    stderr.contains("domain is not running")
}

fn is_already_running(stderr: &str) -> bool {
    stderr.contains("already active") || stderr.contains("already running")
}

#[async_trait]
impl Hypervisor for Virsh {
    async fn list_domains(&self) -> Result<Vec<String>, VirtError> {
        let stdout = self.stdout(&["list", "--all", "--name"]).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    async fn define(&self, name: &str, xml: &str) -> Result<(), VirtError> {
        let path = self.scratch_dir.join(format!("{name}.xml"));
        fs::write_file(&path, xml.as_bytes()).await?;

        let result = self
            .command()
            .arg("define")
            .arg(&path)
            .run()
            .await
            .map(|_| ())
            .map_err(VirtError::from);

        fs::remove_file_if_exists(&path).await?;
        result
    }

    async fn start(&self, name: &str) -> Result<(), VirtError> {
        self.command()
            .args(["start", name])
            .handle(
                |_| Ok(()),
                |stderr| {
                    if is_already_running(stderr) {
                        Err(VirtError::AlreadyRunning {
                            domain: name.to_owned(),
                        })
                    } else {
                        Ok(None)
                    }
                },
            )
            .await?
    }

    async fn shutdown(&self, name: &str) -> Result<(), VirtError> {
        stop(self.command().args(["shutdown", name]), name).await
    }

    async fn destroy(&self, name: &str) -> Result<(), VirtError> {
        stop(self.command().args(["destroy", name]), name).await
    }

    async fn undefine(&self, name: &str) -> Result<(), VirtError> {
        self.stdout(&["undefine", name]).await.map(|_| ())
    }

    async fn state(&self, name: &str) -> Result<DomainState, VirtError> {
        let stdout = self.stdout(&["domstats", "--state", name]).await?;
        let state = parse_domstats(&stdout)?;
        debug!("{name} is {state}");
        Ok(state)
    }

    async fn dump_xml(&self, name: &str) -> Result<String, VirtError> {
        self.stdout(&["dumpxml", name]).await
    }

    async fn leases(&self, network: &str) -> Result<Vec<Lease>, VirtError> {
        let stdout = self.stdout(&["net-dhcp-leases", network]).await?;
        Ok(parse_leases(&stdout))
    }
}

async fn stop(command: &mut Command, name: &str) -> Result<(), VirtError> {
    command
        .handle(
            |_| Ok(()),
            |stderr| {
                if is_not_running(stderr) {
                    Err(VirtError::NotRunning {
                        domain: name.to_owned(),
                    })
                } else {
                    Ok(None)
                }
            },
        )
        .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_targets_connection() {
        let virsh = Virsh::new("qemu:///session", "/tmp");
        assert_eq!(virsh.command().to_string(), "virsh -c qemu:///session");
    }

    #[test]
    fn recognises_faults() {
        assert!(is_not_running(
            "error: Failed to shutdown domain 'x'\nerror: Requested operation is not valid: domain is not running"
        ));
        assert!(is_already_running(
            "error: Failed to start domain 'x'\nerror: Requested operation is not valid: domain is already active"
        ));
        assert!(!is_already_running("error: failed to get domain 'x'"));
    }
}
