//! Packages installed through the node's package manager

use super::host;
use reconcile::{Context, Delta, Lifecycle, LocalTarget, Renderers, Task, TaskError};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    /// Pinned version; any installed version matches when unset
    pub version: Option<String>,
    pub lifecycle: Lifecycle,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            lifecycle: Lifecycle::Sync,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct PackageChanges {
    pub installed: Option<bool>,
    pub version: Option<String>,
}

impl Task for Package {
    const KIND: &'static str = "Package";
    type Changes = PackageChanges;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn find(&mut self, ctx: &Context) -> Result<Option<Self>, TaskError> {
        let installed = host(ctx)?.packages().installed_version(&self.name)?;
        Ok(installed.map(|version| Self {
            name: self.name.clone(),
            version: Some(version),
            lifecycle: self.lifecycle,
        }))
    }

    fn changes(actual: Option<&Self>, expected: &Self) -> PackageChanges {
        let d = Delta::new(actual, expected);
        PackageChanges {
            installed: d.is_create().then_some(true),
            version: d.opt(|p| &p.version),
        }
    }

    fn renderers() -> Renderers<Self> {
        Renderers::new().local(render_local)
    }
}

fn render_local(
    ctx: &Context,
    _target: &LocalTarget,
    _actual: Option<&Package>,
    expected: &mut Package,
    _changes: &PackageChanges,
) -> Result<(), TaskError> {
    host(ctx)?
        .packages()
        .install(&expected.name, expected.version.as_deref())
}
