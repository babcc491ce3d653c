//! Cluster configuration
//!
//! A cluster is described by one TOML file:
//!
//! ```toml
//! [cluster]
//! name = "demo.example.com"
//! region = "us-east-1"
//! ssh_public_key = "~/.ssh/id_ed25519.pub"
//!
//! [node]
//! distribution = "ubuntu"
//!
//! [lifecycles]
//! SSHKey = "ExistsAndWarnIfChanges"
//! ```

use crate::model::Distribution;
use crate::paths;
use anyhow::{Context, Result, bail};
use reconcile::Lifecycle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config file name inside the config directory
pub const CONFIG_FILE: &str = "cluster.toml";

/// Top-level cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster: ClusterSpec,
    #[serde(default)]
    pub node: NodeSpec,
    /// Lifecycle override per task kind, e.g. `SSHKey = "Ignore"`
    #[serde(default)]
    pub lifecycles: BTreeMap<String, Lifecycle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Cluster name, usually a DNS name
    pub name: String,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    pub region: String,
    /// Public key to import: a path, or the key itself
    #[serde(default)]
    pub ssh_public_key: Option<String>,
    /// Name of a key pair that already exists in the account
    #[serde(default)]
    pub ssh_key_name: Option<String>,
    #[serde(default = "default_networking")]
    pub networking: String,
    /// Cilium runs with its own etcd cluster
    #[serde(default)]
    pub cilium_etcd: bool,
    /// Extra tags applied to cloud objects
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node OS distribution; detected from /etc/os-release when unset
    #[serde(default)]
    pub distribution: Option<Distribution>,
    #[serde(default = "default_max_pods")]
    pub max_pods: u32,
    #[serde(default = "default_cluster_dns")]
    pub cluster_dns: String,
    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,
}

impl Default for NodeSpec {
    fn default() -> Self {
        Self {
            distribution: None,
            max_pods: default_max_pods(),
            cluster_dns: default_cluster_dns(),
            cluster_domain: default_cluster_domain(),
        }
    }
}

fn default_cloud() -> String {
    "aws".to_string()
}

fn default_networking() -> String {
    "kubenet".to_string()
}

const fn default_max_pods() -> u32 {
    110
}

fn default_cluster_dns() -> String {
    "100.64.0.10".to_string()
}

fn default_cluster_domain() -> String {
    "cluster.local".to_string()
}

impl ClusterConfig {
    /// Default config file location
    pub fn default_path() -> Result<PathBuf> {
        Ok(paths::config_dir()?.join(CONFIG_FILE))
    }

    /// Load from an explicit path, or from the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid cluster config {}", path.display()))?;
        log::debug!("Loaded cluster config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML content
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.cluster.name.trim().is_empty() {
            bail!("cluster.name must not be empty");
        }
        if self.cluster.cloud != "aws" {
            bail!("unsupported cloud {:?}; only \"aws\" is available", self.cluster.cloud);
        }
        if self.cluster.ssh_public_key.is_some() && self.cluster.ssh_key_name.is_some() {
            bail!("set either cluster.ssh_public_key or cluster.ssh_key_name, not both");
        }
        Ok(())
    }

    /// Lifecycle for a task kind, `Sync` unless overridden
    pub fn lifecycle_for(&self, kind: &str) -> Lifecycle {
        self.lifecycles.get(kind).copied().unwrap_or_default()
    }

    /// Whether Cilium uses a dedicated etcd cluster
    pub fn uses_cilium_etcd(&self) -> bool {
        self.cluster.networking == "cilium" && self.cluster.cilium_etcd
    }

    /// Public key material, read from disk when a path was configured
    pub fn public_key(&self) -> Result<Option<String>> {
        let Some(value) = self.cluster.ssh_public_key.as_deref() else {
            return Ok(None);
        };
        let value = value.trim();
        if looks_like_public_key(value) {
            return Ok(Some(value.to_string()));
        }
        let path = paths::expand(value);
        let key = fs::read_to_string(&path)
            .with_context(|| format!("Could not read SSH public key {}", path.display()))?;
        Ok(Some(key.trim().to_string()))
    }
}

fn looks_like_public_key(value: &str) -> bool {
    ["ssh-", "ecdsa-"].iter().any(|p| value.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[cluster]
name = "demo.example.com"
region = "us-east-1"
"#;

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.cluster.cloud, "aws");
        assert_eq!(config.cluster.networking, "kubenet");
        assert_eq!(config.node.max_pods, 110);
        assert_eq!(config.node.cluster_domain, "cluster.local");
        assert!(config.node.distribution.is_none());
        assert_eq!(config.lifecycle_for("SSHKey"), Lifecycle::Sync);
        assert!(config.public_key().unwrap().is_none());
    }

    #[test]
    fn test_lifecycle_overrides_and_distribution() {
        let config = ClusterConfig::parse(
            r#"
[cluster]
name = "demo"
region = "eu-west-1"
networking = "cilium"
cilium_etcd = true

[node]
distribution = "flatcar"

[lifecycles]
SSHKey = "ExistsAndWarnIfChanges"
"#,
        )
        .unwrap();
        assert_eq!(
            config.lifecycle_for("SSHKey"),
            Lifecycle::ExistsAndWarnIfChanges
        );
        assert_eq!(config.lifecycle_for("File"), Lifecycle::Sync);
        assert_eq!(config.node.distribution, Some(Distribution::Flatcar));
        assert!(config.uses_cilium_etcd());
    }

    #[test]
    fn test_rejects_both_key_sources() {
        let err = ClusterConfig::parse(
            r#"
[cluster]
name = "demo"
region = "us-east-1"
ssh_public_key = "ssh-ed25519 AAAA"
ssh_key_name = "existing"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not both"));
    }

    #[test]
    fn test_rejects_other_clouds() {
        let err = ClusterConfig::parse(
            r#"
[cluster]
name = "demo"
cloud = "gce"
region = "us-central1"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unsupported cloud"));
    }

    #[test]
    fn test_public_key_literal_and_file() {
        let mut config = ClusterConfig::parse(MINIMAL).unwrap();
        config.cluster.ssh_public_key = Some("ssh-ed25519 AAAAC3 admin@host\n".into());
        assert_eq!(
            config.public_key().unwrap().as_deref(),
            Some("ssh-ed25519 AAAAC3 admin@host")
        );

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ssh-rsa AAAAB3 admin@host").unwrap();
        config.cluster.ssh_public_key = Some(file.path().display().to_string());
        assert_eq!(
            config.public_key().unwrap().as_deref(),
            Some("ssh-rsa AAAAB3 admin@host")
        );
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let err = ClusterConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }
}
