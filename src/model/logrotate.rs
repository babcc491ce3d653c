//! Log rotation for Kubernetes component logs

use super::{Distribution, ModelBuilder};
use crate::config::ClusterConfig;
use crate::systemd::Manifest;
use crate::tasks::{File, Package, Service};
use anyhow::Result;
use reconcile::{Lifecycle, Link, Task, TaskSet};

const PACKAGE: &str = "logrotate";
const SERVICE: &str = "logrotate.service";
const TIMER: &str = "logrotate.timer";

/// Component logs rotated on every node
const COMPONENTS: &[&str] = &[
    "docker",
    "kube-addons",
    "kube-apiserver",
    "kube-controller-manager",
    "kube-proxy",
    "kube-scheduler",
    "kubelet",
    "etcd",
    "etcd-events",
];

/// Emits logrotate configuration, package and units for a node
pub struct LogrotateBuilder<'a> {
    pub config: &'a ClusterConfig,
    pub distribution: Distribution,
}

/// Rotation options for one log file
struct Rotation {
    path: String,
    dateformat: Option<&'static str>,
}

impl Rotation {
    fn render(&self) -> String {
        let mut lines = vec![
            format!("{}{{", self.path),
            "  rotate 5".to_string(),
            "  copytruncate".to_string(),
            "  missingok".to_string(),
            "  notifempty".to_string(),
            "  delaycompress".to_string(),
            "  maxsize 100M".to_string(),
        ];
        if let Some(format) = self.dateformat {
            lines.push(format!("  dateformat {format}"));
        }
        lines.push("  daily".to_string());
        lines.push("  create 0644 root root".to_string());
        lines.push("}".to_string());
        lines.join("\n") + "\n"
    }
}

impl LogrotateBuilder<'_> {
    fn components(&self) -> Vec<&'static str> {
        let mut components = COMPONENTS.to_vec();
        if self.config.uses_cilium_etcd() {
            components.push("etcd-cilium");
        }
        components
    }

    fn lifecycle<T: Task>(&self) -> Lifecycle {
        self.config.lifecycle_for(T::KIND)
    }

    fn file(&self, name: &str, dateformat: Option<&'static str>) -> File {
        let rotation = Rotation {
            path: format!("/var/log/{name}.log"),
            dateformat,
        };
        let mut file = File::new(format!("/etc/logrotate.d/{name}"), rotation.render(), "0644");
        file.lifecycle = self.lifecycle::<File>();
        file
    }

    fn service(&self, files: &[Link<File>], package: Option<Link<Package>>) -> Service {
        let mut manifest = Manifest::new();
        manifest
            .set("Unit", "Description", "Rotate and Compress System Logs")
            .set("Service", "ExecStart", "/usr/sbin/logrotate /etc/logrotate.conf");

        let mut service = Service::new(SERVICE, manifest.render())
            .with_unit_dir(self.distribution.systemd_unit_dir());
        // Triggered by the timer only
        service.running = None;
        service.enabled = None;
        service.files = files.to_vec();
        service.packages.extend(package);
        service.lifecycle = self.lifecycle::<Service>();
        service
    }

    fn timer(&self, files: &[Link<File>], service: Option<Link<Service>>) -> Service {
        let mut manifest = Manifest::new();
        manifest
            .set("Unit", "Description", "Hourly Log Rotation")
            .set("Timer", "OnCalendar", "hourly");

        let mut timer =
            Service::new(TIMER, manifest.render()).with_unit_dir(self.distribution.systemd_unit_dir());
        match service {
            Some(service) => timer.after.push(service),
            None => timer.files = files.to_vec(),
        }
        timer.lifecycle = self.lifecycle::<Service>();
        timer
    }
}

impl ModelBuilder for LogrotateBuilder<'_> {
    fn name(&self) -> &'static str {
        "logrotate"
    }

    fn build(&self, tasks: &mut TaskSet) -> Result<()> {
        let dateformat = match self.distribution {
            Distribution::ContainerOs => {
                log::info!("Detected ContainerOS; won't install logrotate");
                return Ok(());
            }
            Distribution::Flatcar => {
                log::info!("Detected Flatcar; won't install logrotate");
                Some("-%Y%m%d-%s")
            }
            Distribution::Ubuntu | Distribution::Debian => None,
        };

        let package = if self.distribution == Distribution::Flatcar {
            None
        } else {
            let mut package = Package::new(PACKAGE);
            package.lifecycle = self.lifecycle::<Package>();
            let link = Link::to(&package);
            tasks.add(package)?;
            Some(link)
        };

        let mut files = Vec::new();
        for component in self.components() {
            let file = self.file(component, dateformat);
            files.push(Link::to(&file));
            tasks.add(file)?;
        }

        // Flatcar ships its own logrotate.service
        let service = match package {
            Some(package) => {
                let service = self.service(&files, Some(package));
                let link = Link::to(&service);
                tasks.add(service)?;
                Some(link)
            }
            None => None,
        };

        tasks.add(self.timer(&files, service))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::TaskKey;

    fn config(extra: &str) -> ClusterConfig {
        ClusterConfig::parse(&format!(
            "[cluster]\nname = \"demo\"\nregion = \"us-east-1\"\n{extra}"
        ))
        .unwrap()
    }

    fn build(config: &ClusterConfig, distribution: Distribution) -> TaskSet {
        let mut tasks = TaskSet::new();
        LogrotateBuilder {
            config,
            distribution,
        }
        .build(&mut tasks)
        .unwrap();
        tasks
    }

    #[test]
    fn test_ubuntu_installs_package_and_units() {
        let config = config("");
        let tasks = build(&config, Distribution::Ubuntu);

        assert!(tasks.get_as::<Package>("logrotate").is_some());
        assert_eq!(tasks.len(), 1 + COMPONENTS.len() + 2);

        let service = tasks.get_as::<Service>(SERVICE).unwrap();
        assert_eq!(service.unit_dir, "/lib/systemd/system");
        assert_eq!(
            service.definition.as_deref(),
            Some(
                "[Unit]\nDescription=Rotate and Compress System Logs\n\n\
                 [Service]\nExecStart=/usr/sbin/logrotate /etc/logrotate.conf\n"
            )
        );
        let deps = Task::dependencies(service);
        assert!(deps.contains(&TaskKey::new("Package", "logrotate")));
        assert!(deps.contains(&TaskKey::new("File", "/etc/logrotate.d/kubelet")));

        let timer = tasks.get_as::<Service>(TIMER).unwrap();
        assert_eq!(Task::dependencies(timer), vec![TaskKey::new("Service", SERVICE)]);
    }

    #[test]
    fn test_rotation_stanza() {
        let config = config("");
        let tasks = build(&config, Distribution::Debian);
        let file = tasks.get_as::<File>("/etc/logrotate.d/kube-proxy").unwrap();
        assert_eq!(file.mode.as_deref(), Some("0644"));
        assert_eq!(
            file.contents.as_deref(),
            Some(
                "/var/log/kube-proxy.log{\n  rotate 5\n  copytruncate\n  missingok\n  \
                 notifempty\n  delaycompress\n  maxsize 100M\n  daily\n  \
                 create 0644 root root\n}\n"
            )
        );
    }

    #[test]
    fn test_flatcar_skips_package_and_service() {
        let config = config("");
        let tasks = build(&config, Distribution::Flatcar);

        assert!(tasks.get_as::<Package>("logrotate").is_none());
        assert!(tasks.get_as::<Service>(SERVICE).is_none());

        let file = tasks.get_as::<File>("/etc/logrotate.d/etcd").unwrap();
        assert!(file.contents.as_deref().unwrap().contains("  dateformat -%Y%m%d-%s\n"));

        let timer = tasks.get_as::<Service>(TIMER).unwrap();
        assert_eq!(timer.unit_dir, "/etc/systemd/system");
        assert_eq!(timer.files.len(), COMPONENTS.len());
    }

    #[test]
    fn test_container_os_builds_nothing() {
        let config = config("");
        assert!(build(&config, Distribution::ContainerOs).is_empty());
    }

    #[test]
    fn test_cilium_etcd_and_lifecycle_override() {
        let config = config(
            "networking = \"cilium\"\ncilium_etcd = true\n\n[lifecycles]\nFile = \"ExistsAndWarnIfChanges\"\n",
        );
        let tasks = build(&config, Distribution::Ubuntu);
        let file = tasks.get_as::<File>("/etc/logrotate.d/etcd-cilium").unwrap();
        assert_eq!(file.lifecycle, Lifecycle::ExistsAndWarnIfChanges);
        assert_eq!(
            tasks.get_as::<Package>("logrotate").unwrap().lifecycle,
            Lifecycle::Sync
        );
    }
}
