//! Node host session
//!
//! Local tasks reach the node's package manager and init system through the
//! traits below. On a real node those shell out to `dpkg`/`apt-get` and
//! `systemctl`; when rendering into a staging root, the state is recorded
//! as JSON under `<root>/var/lib/kubeup/` instead.

use reconcile::{Cloud, TaskError};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};

/// Directory below the root holding staged host state
pub const STATE_DIR: &str = "var/lib/kubeup";

pub trait PackageManager: Send + Sync + fmt::Debug {
    /// Installed version, `None` if the package is not installed
    fn installed_version(&self, name: &str) -> Result<Option<String>, TaskError>;

    /// Install a package, pinned to `version` when given
    fn install(&self, name: &str, version: Option<&str>) -> Result<(), TaskError>;
}

pub trait ServiceManager: Send + Sync + fmt::Debug {
    fn daemon_reload(&self) -> Result<(), TaskError>;
    fn is_enabled(&self, unit: &str) -> Result<bool, TaskError>;
    fn is_active(&self, unit: &str) -> Result<bool, TaskError>;
    fn enable(&self, unit: &str) -> Result<(), TaskError>;
    fn disable(&self, unit: &str) -> Result<(), TaskError>;
    fn restart(&self, unit: &str) -> Result<(), TaskError>;
    fn stop(&self, unit: &str) -> Result<(), TaskError>;
}

// ============================================================================
// Commands
// ============================================================================

/// Run a command and capture stdout; non-zero exit is an error
fn run_capture(cmd: &str, args: &[&str]) -> Result<String, TaskError> {
    let output = Command::new(cmd)
        .args(args)
        .env("DEBIAN_FRONTEND", "noninteractive")
        .output()
        .map_err(|e| TaskError::Other(format!("failed to execute {} {}: {}", cmd, args.join(" "), e)))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(TaskError::Other(format!(
            "{} {} failed: {}",
            cmd,
            args.join(" "),
            stderr.trim()
        )))
    }
}

/// Run a command silently, returning success/failure
fn run_quiet(cmd: &str, args: &[&str]) -> Result<bool, TaskError> {
    Command::new(cmd)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .map_err(|e| TaskError::Other(format!("failed to execute {cmd}: {e}")))
}

/// Debian packages through dpkg and apt-get
#[derive(Debug, Default)]
pub struct Apt;

impl PackageManager for Apt {
    fn installed_version(&self, name: &str) -> Result<Option<String>, TaskError> {
        let output = Command::new("dpkg-query")
            .args(["-W", "-f=${Status}\t${Version}", name])
            .output()
            .map_err(|e| TaskError::Other(format!("failed to execute dpkg-query: {e}")))?;
        if !output.status.success() {
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .split_once('\t')
            .filter(|(status, _)| status.ends_with("installed"))
            .map(|(_, version)| version.trim().to_string()))
    }

    fn install(&self, name: &str, version: Option<&str>) -> Result<(), TaskError> {
        let spec = match version {
            Some(v) => format!("{name}={v}"),
            None => name.to_string(),
        };
        log::info!("Installing package {}", spec);
        run_capture("apt-get", &["install", "-y", "--no-install-recommends", &spec])?;
        Ok(())
    }
}

/// Units managed through systemctl
#[derive(Debug, Default)]
pub struct Systemctl;

impl ServiceManager for Systemctl {
    fn daemon_reload(&self) -> Result<(), TaskError> {
        run_capture("systemctl", &["daemon-reload"]).map(drop)
    }

    fn is_enabled(&self, unit: &str) -> Result<bool, TaskError> {
        run_quiet("systemctl", &["is-enabled", "--quiet", unit])
    }

    fn is_active(&self, unit: &str) -> Result<bool, TaskError> {
        run_quiet("systemctl", &["is-active", "--quiet", unit])
    }

    fn enable(&self, unit: &str) -> Result<(), TaskError> {
        run_capture("systemctl", &["enable", unit]).map(drop)
    }

    fn disable(&self, unit: &str) -> Result<(), TaskError> {
        run_capture("systemctl", &["disable", unit]).map(drop)
    }

    fn restart(&self, unit: &str) -> Result<(), TaskError> {
        run_capture("systemctl", &["restart", unit]).map(drop)
    }

    fn stop(&self, unit: &str) -> Result<(), TaskError> {
        run_capture("systemctl", &["stop", unit]).map(drop)
    }
}

// ============================================================================
// Staged state
// ============================================================================

/// A JSON document under the staging root, updated under a lock
#[derive(Debug)]
struct StagedFile<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _data: std::marker::PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned + Default> StagedFile<T> {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
            _data: std::marker::PhantomData,
        }
    }

    fn read_unlocked(&self) -> Result<T, TaskError> {
        if !self.path.exists() {
            return Ok(T::default());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| TaskError::Other(format!("reading {}: {}", self.path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| TaskError::Other(format!("parsing {}: {}", self.path.display(), e)))
    }

    fn read(&self) -> Result<T, TaskError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_unlocked()
    }

    fn update(&self, f: impl FnOnce(&mut T)) -> Result<(), TaskError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut data = self.read_unlocked()?;
        f(&mut data);
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.path, serde_json::to_string_pretty(&data)?)
        };
        write().map_err(|e| TaskError::Other(format!("writing {}: {}", self.path.display(), e)))
    }
}

/// Package installs recorded in `<root>/var/lib/kubeup/packages.json`
#[derive(Debug)]
pub struct StagedPackages {
    file: StagedFile<BTreeMap<String, String>>,
}

impl StagedPackages {
    pub fn new(root: &Path) -> Self {
        Self {
            file: StagedFile::new(root.join(STATE_DIR).join("packages.json")),
        }
    }
}

impl PackageManager for StagedPackages {
    fn installed_version(&self, name: &str) -> Result<Option<String>, TaskError> {
        Ok(self.file.read()?.get(name).cloned())
    }

    fn install(&self, name: &str, version: Option<&str>) -> Result<(), TaskError> {
        let version = version.unwrap_or("latest").to_string();
        log::debug!("Recording staged install of {} {}", name, version);
        self.file.update(|packages| {
            packages.insert(name.to_string(), version);
        })
    }
}

/// State of one staged unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    pub enabled: bool,
    pub active: bool,
    pub restarts: u32,
}

/// Unit state recorded in `<root>/var/lib/kubeup/services.json`
#[derive(Debug)]
pub struct StagedServices {
    file: StagedFile<BTreeMap<String, UnitState>>,
    reloads: StagedFile<u32>,
}

impl StagedServices {
    pub fn new(root: &Path) -> Self {
        let dir = root.join(STATE_DIR);
        Self {
            file: StagedFile::new(dir.join("services.json")),
            reloads: StagedFile::new(dir.join("daemon-reloads.json")),
        }
    }

    fn unit(&self, unit: &str) -> Result<UnitState, TaskError> {
        Ok(self.file.read()?.get(unit).cloned().unwrap_or_default())
    }
}

impl ServiceManager for StagedServices {
    fn daemon_reload(&self) -> Result<(), TaskError> {
        self.reloads.update(|count| *count += 1)
    }

    fn is_enabled(&self, unit: &str) -> Result<bool, TaskError> {
        Ok(self.unit(unit)?.enabled)
    }

    fn is_active(&self, unit: &str) -> Result<bool, TaskError> {
        Ok(self.unit(unit)?.active)
    }

    fn enable(&self, unit: &str) -> Result<(), TaskError> {
        self.file.update(|units| {
            units.entry(unit.to_string()).or_default().enabled = true;
        })
    }

    fn disable(&self, unit: &str) -> Result<(), TaskError> {
        self.file.update(|units| {
            units.entry(unit.to_string()).or_default().enabled = false;
        })
    }

    fn restart(&self, unit: &str) -> Result<(), TaskError> {
        self.file.update(|units| {
            let state = units.entry(unit.to_string()).or_default();
            state.active = true;
            state.restarts += 1;
        })
    }

    fn stop(&self, unit: &str) -> Result<(), TaskError> {
        self.file.update(|units| {
            units.entry(unit.to_string()).or_default().active = false;
        })
    }
}

// ============================================================================
// Session
// ============================================================================

/// Session handle for node tasks
#[derive(Debug)]
pub struct NodeHost {
    root: PathBuf,
    packages: Box<dyn PackageManager>,
    services: Box<dyn ServiceManager>,
}

impl NodeHost {
    pub fn new(
        root: impl Into<PathBuf>,
        packages: Box<dyn PackageManager>,
        services: Box<dyn ServiceManager>,
    ) -> Self {
        Self {
            root: root.into(),
            packages,
            services,
        }
    }

    /// The running node itself
    pub fn system() -> Self {
        Self::new("/", Box::new(Apt), Box::new(Systemctl))
    }

    /// A staging directory with recorded package and unit state
    pub fn staged(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let packages = Box::new(StagedPackages::new(&root));
        let services = Box::new(StagedServices::new(&root));
        Self::new(root, packages, services)
    }

    /// Map an absolute node path below the root
    pub fn path(&self, node_path: impl AsRef<Path>) -> PathBuf {
        let node_path = node_path.as_ref();
        self.root
            .join(node_path.strip_prefix("/").unwrap_or(node_path))
    }

    pub fn packages(&self) -> &dyn PackageManager {
        self.packages.as_ref()
    }

    pub fn services(&self) -> &dyn ServiceManager {
        self.services.as_ref()
    }
}

impl Cloud for NodeHost {
    fn provider(&self) -> &'static str {
        "node"
    }

    fn region(&self) -> &str {
        "local"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
