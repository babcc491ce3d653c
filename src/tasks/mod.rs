//! Task types rendered by kubeup
//!
//! - [`SshKey`]: an EC2 key pair (cloud and terraform targets)
//! - [`File`], [`Package`], [`Service`]: node artifacts (local target)

mod file;
mod package;
mod service;
mod sshkey;

pub use file::File;
pub use package::Package;
pub use service::{Service, UNIT_DIR};
pub use sshkey::SshKey;

use crate::host::NodeHost;
use reconcile::{Context, TaskError};
use std::io;
use std::path::Path;

/// The node session of a local run
fn host(ctx: &Context) -> Result<&NodeHost, TaskError> {
    ctx.cloud_as::<NodeHost>()
}

fn io_error(action: &str, path: &Path, e: &io::Error) -> TaskError {
    TaskError::Other(format!("{} {}: {}", action, path.display(), e))
}
