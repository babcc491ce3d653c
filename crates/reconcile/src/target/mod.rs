//! Render targets
//!
//! A run renders to exactly one target. Task types declare which kinds they
//! support through their [`crate::Renderers`] table; [`preflight`] rejects a
//! run before anything executes if some task cannot render to the active
//! kind.

pub mod dryrun;
pub mod terraform;

pub use dryrun::{Action, DryRunTarget, PlanSummary, PlannedChange, group_by_kind};
pub use terraform::{Literal, TerraformDocument, TerraformTarget};

use crate::context::Cloud;
use crate::error::{EngineError, TaskError};
use crate::task::TaskSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Kind tag of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKind {
    /// Live cloud API calls
    Cloud,
    /// Generated Terraform JSON configuration
    Terraform,
    /// Files, units and packages on the local node
    Local,
    /// Record change-sets only
    DryRun,
}

impl TargetKind {
    /// All kinds, in declaration order
    pub const ALL: [TargetKind; 4] = [
        TargetKind::Cloud,
        TargetKind::Terraform,
        TargetKind::Local,
        TargetKind::DryRun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Terraform => "terraform",
            Self::Local => "local",
            Self::DryRun => "dry-run",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dryrun" | "dry_run" => Ok(Self::DryRun),
            other => Self::ALL
                .into_iter()
                .find(|k| k.as_str() == other)
                .ok_or_else(|| format!("unknown target {s:?}")),
        }
    }
}

/// The active render target of a run
#[derive(Debug)]
pub enum Target {
    Cloud(CloudTarget),
    Terraform(TerraformTarget),
    Local(LocalTarget),
    DryRun(DryRunTarget),
}

impl Target {
    /// Kind tag used for dispatch
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Cloud(_) => TargetKind::Cloud,
            Self::Terraform(_) => TargetKind::Terraform,
            Self::Local(_) => TargetKind::Local,
            Self::DryRun(_) => TargetKind::DryRun,
        }
    }

    /// The dry-run recorder, if this is a dry-run target
    pub fn as_dry_run(&self) -> Option<&DryRunTarget> {
        match self {
            Self::DryRun(t) => Some(t),
            _ => None,
        }
    }

    /// The Terraform document builder, if this is a Terraform target
    pub fn as_terraform(&self) -> Option<&TerraformTarget> {
        match self {
            Self::Terraform(t) => Some(t),
            _ => None,
        }
    }
}

/// Target that issues live calls through a cloud session
#[derive(Debug, Clone)]
pub struct CloudTarget {
    cloud: Arc<dyn Cloud>,
}

impl CloudTarget {
    pub fn new(cloud: Arc<dyn Cloud>) -> Self {
        Self { cloud }
    }

    /// The session handle
    pub fn cloud(&self) -> &dyn Cloud {
        self.cloud.as_ref()
    }

    /// The session handle downcast to a concrete type
    pub fn cloud_as<C: Cloud + 'static>(&self) -> Result<&C, TaskError> {
        self.cloud.as_any().downcast_ref::<C>().ok_or_else(|| {
            TaskError::Other(format!(
                "cloud target is {} ({}), not the expected type",
                self.cloud.provider(),
                self.cloud.region()
            ))
        })
    }
}

/// Target that renders node artifacts below a root directory.
///
/// With root `/` the node itself is modified; tests and image builds use a
/// staging directory.
#[derive(Debug, Clone)]
pub struct LocalTarget {
    root: PathBuf,
}

impl LocalTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an absolute node path below the root
    pub fn path(&self, node_path: impl AsRef<Path>) -> PathBuf {
        let node_path = node_path.as_ref();
        self.root
            .join(node_path.strip_prefix("/").unwrap_or(node_path))
    }
}

/// Check that every task can render to `kind`.
///
/// All offending tasks are reported at once.
pub fn preflight(tasks: &TaskSet, kind: TargetKind) -> Result<(), EngineError> {
    let mut offenders: Vec<_> = tasks
        .iter()
        .filter(|t| !t.supports(kind))
        .map(|t| t.key())
        .collect();

    if offenders.is_empty() {
        return Ok(());
    }
    offenders.sort();
    Err(EngineError::UnsupportedTarget {
        target: kind,
        tasks: offenders,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_kind_parse() {
        assert_eq!("cloud".parse::<TargetKind>().unwrap(), TargetKind::Cloud);
        assert_eq!("Terraform".parse::<TargetKind>().unwrap(), TargetKind::Terraform);
        assert_eq!("dry-run".parse::<TargetKind>().unwrap(), TargetKind::DryRun);
        assert_eq!("dryrun".parse::<TargetKind>().unwrap(), TargetKind::DryRun);
        assert!("gce".parse::<TargetKind>().is_err());
    }

    #[test]
    fn test_local_target_path_maps_below_root() {
        let target = LocalTarget::new("/tmp/stage");
        assert_eq!(
            target.path("/etc/logrotate.d/kubelet"),
            PathBuf::from("/tmp/stage/etc/logrotate.d/kubelet")
        );
        assert_eq!(target.path("relative"), PathBuf::from("/tmp/stage/relative"));
    }

    #[test]
    fn test_target_kind_dispatch() {
        let target = Target::DryRun(DryRunTarget::new());
        assert_eq!(target.kind(), TargetKind::DryRun);
        assert!(target.as_dry_run().is_some());
        assert!(target.as_terraform().is_none());
    }
}
