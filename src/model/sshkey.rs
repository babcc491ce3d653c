//! The cluster's SSH key pair

use super::ModelBuilder;
use crate::config::ClusterConfig;
use crate::pki::PublicKey;
use crate::tasks::SshKey;
use anyhow::{Context, Result};
use reconcile::{Tags, Task, TaskSet};

pub struct SshKeyBuilder<'a> {
    pub config: &'a ClusterConfig,
}

impl SshKeyBuilder<'_> {
    /// Tags identifying objects owned by this cluster
    pub fn cluster_tags(&self) -> Tags {
        let name = &self.config.cluster.name;
        let mut tags = Tags::from([
            ("Name".to_string(), name.clone()),
            ("KubernetesCluster".to_string(), name.clone()),
            (format!("kubernetes.io/cluster/{name}"), "owned".to_string()),
        ]);
        tags.extend(self.config.cluster.tags.clone());
        tags
    }

    fn key(&self) -> Result<Option<SshKey>> {
        let lifecycle = self.config.lifecycle_for(SshKey::KIND);

        if let Some(name) = &self.config.cluster.ssh_key_name {
            return Ok(Some(SshKey {
                id: None,
                name: name.clone(),
                lifecycle,
                shared: true,
                public_key: None,
                key_fingerprint: None,
                tags: Tags::new(),
            }));
        }

        let Some(public_key) = self.config.public_key()? else {
            log::debug!("No SSH public key configured");
            return Ok(None);
        };
        let parsed = PublicKey::parse(&public_key).context("Invalid SSH public key")?;

        Ok(Some(SshKey {
            id: None,
            name: format!(
                "kubernetes.{}-{}",
                self.config.cluster.name,
                parsed.openssh_fingerprint()
            ),
            lifecycle,
            shared: false,
            public_key: Some(public_key),
            key_fingerprint: None,
            tags: self.cluster_tags(),
        }))
    }
}

impl ModelBuilder for SshKeyBuilder<'_> {
    fn name(&self) -> &'static str {
        "sshkey"
    }

    fn build(&self, tasks: &mut TaskSet) -> Result<()> {
        if let Some(key) = self.key()? {
            tasks.add(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::fixtures::RSA;

    fn build(extra: &str) -> TaskSet {
        let config = ClusterConfig::parse(&format!(
            "[cluster]\nname = \"demo.example.com\"\nregion = \"us-east-1\"\n{extra}"
        ))
        .unwrap();
        let mut tasks = TaskSet::new();
        SshKeyBuilder { config: &config }.build(&mut tasks).unwrap();
        tasks
    }

    #[test]
    fn test_public_key_names_key_by_fingerprint() {
        let tasks = build(&format!("ssh_public_key = \"{RSA}\"\n[cluster.tags]\nteam = \"infra\"\n"));
        assert_eq!(tasks.len(), 1);

        let name = "kubernetes.demo.example.com-d6:67:b6:ce:5a:6d:b9:b1:8a:b5:77:6e:85:78:da:53";
        let key = tasks.get_as::<SshKey>(name).unwrap();
        assert!(!key.shared);
        assert_eq!(key.public_key.as_deref(), Some(RSA));
        assert_eq!(key.tags["KubernetesCluster"], "demo.example.com");
        assert_eq!(key.tags["kubernetes.io/cluster/demo.example.com"], "owned");
        assert_eq!(key.tags["team"], "infra");
    }

    #[test]
    fn test_existing_key_is_shared() {
        let tasks = build("ssh_key_name = \"ops\"\n");
        let key = tasks.get_as::<SshKey>("ops").unwrap();
        assert!(key.shared);
        assert!(key.is_existing_key());
        assert!(key.tags.is_empty());
    }

    #[test]
    fn test_no_key_configured() {
        assert!(build("").is_empty());
    }
}
