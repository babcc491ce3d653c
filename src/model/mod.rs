//! Model builders
//!
//! A builder reads the cluster configuration and adds the tasks it implies
//! to a [`TaskSet`]. Builders never talk to a backend; everything they emit
//! is reconciled later by the engine.

mod kubelet;
mod logrotate;
mod sshkey;

pub use kubelet::KubeletBuilder;
pub use logrotate::LogrotateBuilder;
pub use sshkey::SshKeyBuilder;

use anyhow::{Context, Result};
use reconcile::TaskSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Producer of tasks from cluster configuration
pub trait ModelBuilder {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Add this builder's tasks
    fn build(&self, tasks: &mut TaskSet) -> Result<()>;
}

/// Run builders in order into one task set
pub fn build_all(builders: &[&dyn ModelBuilder]) -> Result<TaskSet> {
    let mut tasks = TaskSet::new();
    for builder in builders {
        let before = tasks.len();
        builder
            .build(&mut tasks)
            .with_context(|| format!("Model builder {} failed", builder.name()))?;
        log::debug!(
            "Model builder {} added {} task(s)",
            builder.name(),
            tasks.len() - before
        );
    }
    Ok(tasks)
}

/// Node operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    Ubuntu,
    Debian,
    Flatcar,
    #[serde(rename = "containeros")]
    ContainerOs,
}

impl Distribution {
    pub const ALL: [Self; 4] = [Self::Ubuntu, Self::Debian, Self::Flatcar, Self::ContainerOs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu",
            Self::Debian => "debian",
            Self::Flatcar => "flatcar",
            Self::ContainerOs => "containeros",
        }
    }

    /// Parse the `ID=` line of an os-release file
    pub fn from_os_release(content: &str) -> Option<Self> {
        let id = content
            .lines()
            .find_map(|line| line.strip_prefix("ID="))?
            .trim()
            .trim_matches('"');
        match id {
            "ubuntu" => Some(Self::Ubuntu),
            "debian" => Some(Self::Debian),
            "flatcar" => Some(Self::Flatcar),
            "cos" => Some(Self::ContainerOs),
            _ => None,
        }
    }

    /// Detect from `<root>/etc/os-release`
    pub fn detect(root: &Path) -> Result<Self> {
        let path = root.join("etc/os-release");
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::from_os_release(&content)
            .with_context(|| format!("Unsupported distribution in {}", path.display()))
    }

    /// Read-only /usr distributions keep custom units under /etc
    pub fn systemd_unit_dir(&self) -> &'static str {
        match self {
            Self::Flatcar | Self::ContainerOs => "/etc/systemd/system",
            Self::Ubuntu | Self::Debian => crate::tasks::UNIT_DIR,
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Distribution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown distribution {s:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_os_release() {
        let ubuntu = "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nID=ubuntu\nID_LIKE=debian\n";
        assert_eq!(Distribution::from_os_release(ubuntu), Some(Distribution::Ubuntu));
        assert_eq!(
            Distribution::from_os_release("ID=\"flatcar\"\n"),
            Some(Distribution::Flatcar)
        );
        assert_eq!(
            Distribution::from_os_release("ID=cos\n"),
            Some(Distribution::ContainerOs)
        );
        assert_eq!(Distribution::from_os_release("ID=arch\n"), None);
        assert_eq!(Distribution::from_os_release(""), None);
    }

    #[test]
    fn test_detect_from_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Distribution::detect(dir.path()).is_err());

        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/os-release"), "ID=debian\n").unwrap();
        assert_eq!(Distribution::detect(dir.path()).unwrap(), Distribution::Debian);
    }

    #[test]
    fn test_parse_and_unit_dir() {
        assert_eq!("Flatcar".parse::<Distribution>().unwrap(), Distribution::Flatcar);
        assert!("windows".parse::<Distribution>().is_err());
        assert_eq!(Distribution::Flatcar.systemd_unit_dir(), "/etc/systemd/system");
        assert_eq!(Distribution::Ubuntu.systemd_unit_dir(), "/lib/systemd/system");
    }
}
