use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use russh::keys::PublicKey;
use serde::{Deserialize, Serialize};
use spinup_cmd::{Command, CommandError};
use spinup_fs::{self as fs, FsError};
use spinup_machine::MachineSpec;
use spinup_system::OsVariant;
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Yaml(#[from] serde_saphyr::ser_error::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    SshKey(#[from] russh::keys::ssh_key::Error),

    #[error("ssh public key is malformed")]
    MalformedKey,

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Account cloud-init sets up on each distribution's cloud image.
pub fn login_user(os_variant: OsVariant) -> &'static str {
    match os_variant {
        OsVariant::Ubuntu => "ubuntu",
        OsVariant::Debian => "debian",
        OsVariant::Fedora => "fedora",
        OsVariant::Centos => "centos",
        OsVariant::Coreos => "core",
    }
}

/// How the boot configuration volume is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayout {
    /// cloud-init NoCloud: `meta-data` and `user-data` at the root.
    NoCloud,
    /// OpenStack config drive, read by CoreOS.
    ConfigDrive,
}

impl ConfigLayout {
    pub fn for_variant(os_variant: OsVariant) -> Self {
        match os_variant {
            OsVariant::Coreos => ConfigLayout::ConfigDrive,
            _ => ConfigLayout::NoCloud,
        }
    }

    pub fn volume_label(&self) -> &'static str {
        match self {
            ConfigLayout::NoCloud => "cidata",
            ConfigLayout::ConfigDrive => "config-2",
        }
    }

    pub fn meta_data_path(&self) -> &'static str {
        match self {
            ConfigLayout::NoCloud => "/meta-data",
            ConfigLayout::ConfigDrive => "/openstack/latest/meta_data.json",
        }
    }

    pub fn user_data_path(&self) -> &'static str {
        match self {
            ConfigLayout::NoCloud => "/user-data",
            ConfigLayout::ConfigDrive => "/openstack/latest/user_data",
        }
    }
}

/// An OpenSSH public key without its comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    pub algorithm: String,
    pub body: String,
}

impl AuthorizedKey {
    pub async fn load(path: &Path) -> Result<Self, ProvisionError> {
        let text = fs::read_file_to_string(path).await?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ProvisionError> {
        let key = PublicKey::from_openssh(text.trim())?;
        let openssh = key.to_openssh()?;
        let mut fields = openssh.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(algorithm), Some(body)) => Ok(Self {
                algorithm: algorithm.to_owned(),
                body: body.to_owned(),
            }),
            _ => Err(ProvisionError::MalformedKey),
        }
    }

    /// `<algorithm> <body>`, as found in `authorized_keys`.
    pub fn to_line(&self) -> String {
        format!("{} {}", self.algorithm, self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CloudInitMetaData {
    instance_id: String,
    local_hostname: String,
    public_keys: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CloudInitUserData {
    hostname: String,
    ssh_authorized_keys: Vec<String>,
    user: String,
    manage_etc_hosts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct OpenStackMetaData {
    uuid: String,
    name: String,
    hostname: String,
    public_keys: BTreeMap<String, String>,
}

fn instance_id(spec: &MachineSpec) -> String {
    spec.instance_id
        .clone()
        .unwrap_or_else(|| format!("iid-{}", spec.uuid.simple()))
}

pub fn render_meta_data(spec: &MachineSpec, key: &AuthorizedKey) -> Result<String, ProvisionError> {
    let meta_data = CloudInitMetaData {
        instance_id: instance_id(spec),
        local_hostname: spec.hostname.to_string(),
        public_keys: BTreeMap::from([(key.algorithm.clone(), key.body.clone())]),
    };
    Ok(serde_saphyr::to_string(&meta_data)?)
}

pub fn render_openstack_meta_data(
    spec: &MachineSpec,
    key: &AuthorizedKey,
) -> Result<String, ProvisionError> {
    let meta_data = OpenStackMetaData {
        uuid: instance_id(spec),
        name: spec.hostname.to_string(),
        hostname: spec.hostname.to_string(),
        public_keys: BTreeMap::from([("spinup".to_owned(), key.to_line())]),
    };
    Ok(serde_json::to_string_pretty(&meta_data)?)
}

pub fn render_user_data(spec: &MachineSpec, key: &AuthorizedKey) -> Result<String, ProvisionError> {
    let user_data = CloudInitUserData {
        hostname: spec.hostname.to_string(),
        ssh_authorized_keys: vec![key.to_line()],
        user: login_user(spec.os_variant).to_owned(),
        manage_etc_hosts: true,
    };
    Ok(format!(
        "#cloud-config\n{}",
        serde_saphyr::to_string(&user_data)?
    ))
}

/// Builds each machine's disk and boot configuration volume.
#[derive(Debug, Clone)]
pub struct Provisioner {
    instances_dir: PathBuf,
    scratch_dir: PathBuf,
    key: AuthorizedKey,
    qemu_img: String,
    mkisofs: String,
}

impl Provisioner {
    pub fn new(instances_dir: PathBuf, scratch_dir: PathBuf, key: AuthorizedKey) -> Self {
        Self {
            instances_dir,
            scratch_dir,
            key,
            qemu_img: "qemu-img".to_owned(),
            mkisofs: "mkisofs".to_owned(),
        }
    }

    pub fn with_tools(mut self, qemu_img: impl Into<String>, mkisofs: impl Into<String>) -> Self {
        self.qemu_img = qemu_img.into();
        self.mkisofs = mkisofs.into();
        self
    }

    pub fn disk_path(&self, spec: &MachineSpec) -> PathBuf {
        self.instances_dir
            .join(format!("{}.qcow2", spec.domain_name()))
    }

    pub fn config_drive_path(&self, spec: &MachineSpec) -> PathBuf {
        self.instances_dir
            .join(format!("{}-config.iso", spec.domain_name()))
    }

    /// Create both artifacts and record them, and a fresh instance id, on `spec`.
    #[instrument(skip_all, fields(machine = %spec.name))]
    pub async fn provision(
        &self,
        spec: &mut MachineSpec,
        base_image: &Path,
    ) -> Result<(), ProvisionError> {
        spec.generate_instance_id();

        let disk = self.disk_path(spec);
        self.create_overlay(base_image, &disk).await?;
        spec.disk_image = Some(disk);

        let config_drive = self.config_drive_path(spec);
        self.create_config_drive(spec, &config_drive).await?;
        spec.config_drive = Some(config_drive);

        Ok(())
    }

    async fn create_overlay(&self, base_image: &Path, disk: &Path) -> Result<(), ProvisionError> {
        info!("creating disk {}", disk.display());
        let backing_file = format!(
            "backing_file={},backing_fmt=qcow2",
            base_image.display()
        );

        Command::new(&self.qemu_img)
            .arg("create")
            .args(["-f", "qcow2"])
            .args(["-o", &backing_file])
            .arg(disk)
            .run()
            .await?;
        Ok(())
    }

    async fn create_config_drive(
        &self,
        spec: &MachineSpec,
        image_path: &Path,
    ) -> Result<(), ProvisionError> {
        let layout = ConfigLayout::for_variant(spec.os_variant);
        let (meta_data, meta_data_name) = match layout {
            ConfigLayout::NoCloud => (render_meta_data(spec, &self.key)?, "meta-data"),
            ConfigLayout::ConfigDrive => (
                render_openstack_meta_data(spec, &self.key)?,
                "meta_data.json",
            ),
        };
        let user_data = render_user_data(spec, &self.key)?;

        let stage_dir = self.scratch_dir.join(spec.domain_name());
        fs::setup_directory_access(&stage_dir).await?;
        let meta_data_path = stage_dir.join(meta_data_name);
        let user_data_path = stage_dir.join("user-data");
        fs::write_file(&meta_data_path, meta_data.as_bytes()).await?;
        fs::write_file(&user_data_path, user_data.as_bytes()).await?;

        info!("creating config drive {}", image_path.display());
        let result = Command::new(&self.mkisofs)
            .arg("-RJ")
            .args(["-V", layout.volume_label()])
            .arg("-o")
            .arg(image_path)
            .arg("-graft-points")
            .arg(format!(
                "{}={}",
                layout.meta_data_path(),
                meta_data_path.to_string_lossy()
            ))
            .arg(format!(
                "{}={}",
                layout.user_data_path(),
                user_data_path.to_string_lossy()
            ))
            .run()
            .await;

        fs::remove_dir_all(&stage_dir).await?;
        debug!("removed {}", stage_dir.display());
        result?;
        Ok(())
    }
}
