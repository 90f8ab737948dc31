use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use spinup_cmd::{Command, CommandError};
use spinup_ctx::{Config, Context, ContextError};
use spinup_fs::{self as fs, FsError};
use spinup_http::{HttpClient, HttpError};
use spinup_virt::{Hypervisor, Virsh};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::info;

use crate::cli::{Cli, UsageError, Verb};
use crate::descriptor::{DescriptorError, parse_descriptors};
use crate::images::{HttpImageFetcher, ImageCache, ImageError, ImageTable};
use crate::lifecycle::{Lifecycle, LifecycleError, status_table};
use crate::probe::{ProbeError, current_address};
use crate::provision::{AuthorizedKey, ProvisionError, Provisioner, login_user};
use crate::registry::{Cluster, LookupError, RegistryError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("failed to get current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Join(#[from] JoinError),
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let ctx = Context::create(cli.config_path.as_deref()).await?;
    ctx.setup_dirs().await?;
    let source_dir = env::current_dir().map_err(AppError::CurrentDir)?;

    let config = ctx.config();
    let hypervisor: Arc<dyn Hypervisor> = Arc::new(Virsh::new(
        config.connect_uri.clone(),
        ctx.paths().runtime_dir(),
    ));
    let lifecycle = Lifecycle::new(hypervisor, source_dir.clone(), config);

    let (verb, args) = Verb::split(&cli.args);
    match verb {
        Verb::Create => cmd_create(&ctx, &lifecycle, &source_dir, args).await,
        Verb::Ssh => {
            let name = verb.optional_name(args)?;
            let cluster = lifecycle.cluster().await?;
            cmd_ssh(config, &lifecycle, &cluster, name).await
        }
        Verb::Destroy => {
            verb.no_args(args)?;
            let cluster = lifecycle.cluster().await?;
            lifecycle.destroy(&cluster).await?;
            Ok(())
        }
        Verb::Shutdown => {
            let name = verb.optional_name(args)?;
            let cluster = lifecycle.cluster().await?;
            lifecycle.shutdown(&cluster, name).await?;
            Ok(())
        }
        Verb::Start => {
            let name = verb.optional_name(args)?;
            let cluster = lifecycle.cluster().await?;
            lifecycle.start(&cluster, name).await?;
            Ok(())
        }
        Verb::Status => {
            let name = verb.optional_name(args)?;
            let cluster = lifecycle.cluster().await?;
            let statuses = lifecycle.status(&cluster, name).await?;
            println!("{}", status_table(&statuses));
            Ok(())
        }
    }
}

async fn cmd_create(
    ctx: &Context,
    lifecycle: &Lifecycle,
    source_dir: &Path,
    args: &[String],
) -> Result<(), AppError> {
    let config = ctx.config();
    let specs = parse_descriptors(args, source_dir)?;
    let key = AuthorizedKey::load(&config.ssh_public_key).await?;

    let http = HttpClient::new()?.with_progress(true);
    let (images, task) = ImageCache::spawn(
        config.images_dir.clone(),
        ImageTable::builtin()?,
        HttpImageFetcher::new(http),
    );
    let provisioner = Arc::new(Provisioner::new(
        config.instances_dir.clone(),
        ctx.paths().runtime_dir().to_path_buf(),
        key,
    ));

    let result = lifecycle.create(specs, &images, provisioner).await;
    task.await?;
    for (name, addr) in result? {
        info!("{name} is up at {addr}");
    }
    Ok(())
}

async fn cmd_ssh(
    config: &Config,
    lifecycle: &Lifecycle,
    cluster: &Cluster,
    name: Option<&str>,
) -> Result<(), AppError> {
    let member = cluster.single(name)?;
    let domain = member.domain();
    let ip = current_address(lifecycle.hypervisor(), &config.network, domain)
        .await?
        .ok_or_else(|| LookupError::NoLease {
            domain: domain.to_owned(),
        })?;
    let user = login_user(member.spec.os_variant);

    let mut command = Command::new(&config.ssh_program);
    command.args([
        "-o",
        "StrictHostKeyChecking=no",
        "-o",
        "UserKnownHostsFile=/dev/null",
    ]);
    if let Some(identity) = private_key_path(&config.ssh_public_key) {
        if fs::path_exists(&identity).await? {
            command.arg("-i").arg(identity);
        }
    }
    if config.ssh_port != 22 {
        command.arg("-p").arg(config.ssh_port.to_string());
    }
    command.arg(format!("{user}@{ip}"));

    Err(command.exec().into())
}

/// `id_rsa` for `id_rsa.pub`.
fn private_key_path(public_key: &Path) -> Option<PathBuf> {
    (public_key.extension()? == "pub").then(|| public_key.with_extension(""))
}
