//! Kubelet configuration and unit

use super::{Distribution, ModelBuilder};
use crate::config::ClusterConfig;
use crate::systemd::Manifest;
use crate::tasks::{File, Service};
use anyhow::Result;
use reconcile::{Link, Task, TaskSet};

pub const CONFIG_PATH: &str = "/var/lib/kubelet/config.yaml";
pub const ENV_PATH: &str = "/etc/sysconfig/kubelet";
const SERVICE: &str = "kubelet.service";

pub struct KubeletBuilder<'a> {
    pub config: &'a ClusterConfig,
    pub distribution: Distribution,
}

impl KubeletBuilder<'_> {
    /// Where the kubelet binary is installed
    fn bin_dir(&self) -> &'static str {
        match self.distribution {
            Distribution::ContainerOs => "/home/kubernetes/bin",
            Distribution::Flatcar => "/opt/kubernetes/bin",
            Distribution::Ubuntu | Distribution::Debian => "/usr/local/bin",
        }
    }

    fn kubelet_config(&self) -> String {
        let node = &self.config.node;
        format!(
            "apiVersion: kubelet.config.k8s.io/v1beta1\n\
             kind: KubeletConfiguration\n\
             cgroupDriver: systemd\n\
             clusterDNS:\n\
             - {}\n\
             clusterDomain: {}\n\
             maxPods: {}\n",
            node.cluster_dns, node.cluster_domain, node.max_pods
        )
    }

    fn environment(&self) -> String {
        format!(
            "DAEMON_ARGS=\"--config={CONFIG_PATH} --kubeconfig=/var/lib/kubelet/kubeconfig \
             --node-labels=kubernetes.io/cluster={}\"\n",
            self.config.cluster.name
        )
    }

    fn unit(&self) -> String {
        let mut manifest = Manifest::new();
        manifest
            .set("Unit", "Description", "Kubernetes Kubelet Server")
            .set("Unit", "Documentation", "https://github.com/kubernetes/kubernetes")
            .set("Unit", "After", "containerd.service")
            .set("Service", "EnvironmentFile", ENV_PATH)
            .set(
                "Service",
                "ExecStart",
                &format!("{}/kubelet \"$DAEMON_ARGS\"", self.bin_dir()),
            )
            .set("Service", "Restart", "always")
            .set("Service", "RestartSec", "2s")
            .set("Service", "StartLimitInterval", "0")
            .set("Service", "KillMode", "process")
            .set("Install", "WantedBy", "multi-user.target");
        manifest.render()
    }
}

impl ModelBuilder for KubeletBuilder<'_> {
    fn name(&self) -> &'static str {
        "kubelet"
    }

    fn build(&self, tasks: &mut TaskSet) -> Result<()> {
        let file_lifecycle = self.config.lifecycle_for(File::KIND);

        let mut files = Vec::new();
        for (path, contents) in [
            (CONFIG_PATH, self.kubelet_config()),
            (ENV_PATH, self.environment()),
        ] {
            let mut file = File::new(path, contents, "0644");
            file.lifecycle = file_lifecycle;
            files.push(Link::to(&file));
            tasks.add(file)?;
        }

        let mut service =
            Service::new(SERVICE, self.unit()).with_unit_dir(self.distribution.systemd_unit_dir());
        service.files = files;
        service.lifecycle = self.config.lifecycle_for(Service::KIND);
        tasks.add(service)?;
        Ok(())
    }
}
