//! Systemd units on the node

use super::{File, Package, host, io_error};
use reconcile::{Context, Delta, Lifecycle, Link, LocalTarget, Renderers, Task, TaskError, TaskKey};
use serde::Serialize;
use std::fs;
use std::io;

/// Default directory for unit files
pub const UNIT_DIR: &str = "/lib/systemd/system";

/// A systemd unit (service, timer, ...) written from a definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Unit name including its suffix, e.g. "kubelet.service"
    pub name: String,
    pub definition: Option<String>,
    pub unit_dir: String,
    pub running: Option<bool>,
    pub enabled: Option<bool>,
    /// Whether the running and enabled state is managed at all
    pub manage_state: bool,
    /// Files the unit reads; they are written first
    pub files: Vec<Link<File>>,
    /// Packages the unit needs
    pub packages: Vec<Link<Package>>,
    /// Units that must be rendered first
    pub after: Vec<Link<Service>>,
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Default, Serialize)]
pub struct ServiceChanges {
    pub definition: Option<String>,
    pub running: Option<bool>,
    pub enabled: Option<bool>,
}

impl Service {
    /// A unit with the usual defaults: running, enabled, state managed
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: Some(definition.into()),
            unit_dir: UNIT_DIR.to_string(),
            running: Some(true),
            enabled: Some(true),
            manage_state: true,
            files: Vec::new(),
            packages: Vec::new(),
            after: Vec::new(),
            lifecycle: Lifecycle::Sync,
        }
    }

    pub fn with_unit_dir(mut self, dir: impl Into<String>) -> Self {
        self.unit_dir = dir.into();
        self
    }

    fn unit_path(&self) -> String {
        format!("{}/{}", self.unit_dir.trim_end_matches('/'), self.name)
    }
}

impl Task for Service {
    const KIND: &'static str = "Service";
    type Changes = ServiceChanges;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.files
            .iter()
            .map(Link::key)
            .chain(self.packages.iter().map(Link::key))
            .chain(self.after.iter().map(Link::key))
            .collect()
    }

    fn find(&mut self, ctx: &Context) -> Result<Option<Self>, TaskError> {
        let host = host(ctx)?;
        let path = host.path(self.unit_path());
        let definition = match fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("reading", &path, &e)),
        };

        let (running, enabled) = if self.manage_state {
            let services = host.services();
            (
                Some(services.is_active(&self.name)?),
                Some(services.is_enabled(&self.name)?),
            )
        } else {
            (self.running, self.enabled)
        };

        Ok(Some(Self {
            definition: Some(definition),
            running,
            enabled,
            ..self.clone()
        }))
    }

    fn changes(actual: Option<&Self>, expected: &Self) -> ServiceChanges {
        let d = Delta::new(actual, expected);
        ServiceChanges {
            definition: d.opt(|s| &s.definition),
            running: d.opt(|s| &s.running),
            enabled: d.opt(|s| &s.enabled),
        }
    }

    fn renderers() -> Renderers<Self> {
        Renderers::new().local(render_local)
    }
}

fn render_local(
    ctx: &Context,
    target: &LocalTarget,
    actual: Option<&Service>,
    expected: &mut Service,
    changes: &ServiceChanges,
) -> Result<(), TaskError> {
    let host = host(ctx)?;
    let services = host.services();

    if let Some(definition) = &changes.definition {
        let path = target.path(expected.unit_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error("creating", parent, &e))?;
        }
        fs::write(&path, definition).map_err(|e| io_error("writing", &path, &e))?;
        services.daemon_reload()?;
    }

    if !expected.manage_state {
        return Ok(());
    }

    match expected.enabled {
        Some(true) if actual.is_none() || changes.enabled.is_some() => {
            log::info!("Enabling {}", expected.name);
            services.enable(&expected.name)?;
        }
        Some(false) if changes.enabled.is_some() => {
            log::info!("Disabling {}", expected.name);
            services.disable(&expected.name)?;
        }
        _ => {}
    }

    match expected.running {
        Some(true) if changes.definition.is_some() || changes.running.is_some() => {
            log::info!("Restarting {}", expected.name);
            services.restart(&expected.name)?;
        }
        Some(false) if changes.running.is_some() => {
            log::info!("Stopping {}", expected.name);
            services.stop(&expected.name)?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{NodeHost, STATE_DIR};
    use reconcile::{Target, TaskSet, TaskStatus, execute_simple};
    use std::sync::Arc;

    fn apply(root: &std::path::Path, tasks: &mut TaskSet) -> reconcile::RunResult {
        let ctx = Context::new().with_cloud(Arc::new(NodeHost::staged(root)));
        let target = Target::Local(LocalTarget::new(root));
        execute_simple(tasks, &ctx, &target).unwrap()
    }

    fn unit() -> Service {
        Service::new("demo.service", "[Service]\nExecStart=/bin/true\n")
    }

    #[test]
    fn test_writes_enables_and_starts() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = TaskSet::new();
        tasks.add(unit()).unwrap();

        let result = apply(dir.path(), &mut tasks);
        assert_eq!(result.summary.created, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("lib/systemd/system/demo.service")).unwrap(),
            "[Service]\nExecStart=/bin/true\n"
        );

        let services = fs::read_to_string(dir.path().join(STATE_DIR).join("services.json")).unwrap();
        let services: serde_json::Value = serde_json::from_str(&services).unwrap();
        assert_eq!(services["demo.service"]["enabled"], true);
        assert_eq!(services["demo.service"]["active"], true);

        let mut again = TaskSet::new();
        again.add(unit()).unwrap();
        let result = apply(dir.path(), &mut again);
        assert_eq!(result.summary.no_change, 1);
    }

    #[test]
    fn test_definition_change_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = TaskSet::new();
        tasks.add(unit()).unwrap();
        apply(dir.path(), &mut tasks);

        let mut changed = TaskSet::new();
        changed
            .add(Service::new("demo.service", "[Service]\nExecStart=/bin/false\n"))
            .unwrap();
        let result = apply(dir.path(), &mut changed);
        assert_eq!(
            result.status(&TaskKey::new("Service", "demo.service")),
            Some(&TaskStatus::Updated)
        );

        let services = fs::read_to_string(dir.path().join(STATE_DIR).join("services.json")).unwrap();
        let services: serde_json::Value = serde_json::from_str(&services).unwrap();
        assert_eq!(services["demo.service"]["restarts"], 2);
    }

    #[test]
    fn test_stopping_and_disabling_converges() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = TaskSet::new();
        tasks.add(unit()).unwrap();
        apply(dir.path(), &mut tasks);

        let stopped = || {
            let mut service = unit();
            service.running = Some(false);
            service.enabled = Some(false);
            let mut tasks = TaskSet::new();
            tasks.add(service).unwrap();
            tasks
        };
        let key = TaskKey::new("Service", "demo.service");

        let first = apply(dir.path(), &mut stopped());
        assert_eq!(first.status(&key), Some(&TaskStatus::Updated));
        let services = fs::read_to_string(dir.path().join(STATE_DIR).join("services.json")).unwrap();
        let services: serde_json::Value = serde_json::from_str(&services).unwrap();
        assert_eq!(services["demo.service"]["enabled"], false);
        assert_eq!(services["demo.service"]["active"], false);

        let second = apply(dir.path(), &mut stopped());
        assert_eq!(second.status(&key), Some(&TaskStatus::NoChange));
    }

    #[test]
    fn test_links_are_dependencies() {
        let mut service = unit();
        service.files.push(Link::new("/etc/demo.conf"));
        service.packages.push(Link::new("demo"));
        service.after.push(Link::new("network.target"));
        assert_eq!(
            Task::dependencies(&service),
            vec![
                TaskKey::new("File", "/etc/demo.conf"),
                TaskKey::new("Package", "demo"),
                TaskKey::new("Service", "network.target"),
            ]
        );
    }

    #[test]
    fn test_unit_dir_override() {
        let service = unit().with_unit_dir("/etc/systemd/system/");
        assert_eq!(service.unit_path(), "/etc/systemd/system/demo.service");
    }
}
