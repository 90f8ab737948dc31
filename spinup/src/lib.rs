mod cli;
mod descriptor;
mod dispatch;
mod domain;
mod images;
mod lifecycle;
mod probe;
mod provision;
mod registry;
#[cfg(test)]
mod testing;

pub use crate::cli::{Cli, UsageError, Verb};
pub use crate::descriptor::{DescriptorError, DescriptorToken, parse_descriptors, parse_token};
pub use crate::dispatch::{AppError, run};
pub use crate::domain::{TemplateError, render_domain};
pub use crate::images::{HttpImageFetcher, ImageCache, ImageError, ImageFetcher, ImageTable};
pub use crate::lifecycle::{Lifecycle, LifecycleError, MachineStatus, status_table};
pub use crate::probe::{ProbeError, Prober, current_address};
pub use crate::provision::{AuthorizedKey, ProvisionError, Provisioner, login_user};
pub use crate::registry::{Cluster, ClusterMember, LookupError, RegistryError};
