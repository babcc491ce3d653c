//! Centralized path resolution for kubeup
//!
//! # Environment Variables
//!
//! - `KUBEUP_CONFIG_DIR` - Override config directory
//! - `KUBEUP_STATE_DIR` - Override state directory (mock cloud state, generated output)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `KUBEUP_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/kubeup` (if set)
//! 3. `~/.config/kubeup`
//!
//! For state_dir():
//! 1. `KUBEUP_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/kubeup` (if set)
//! 3. `~/.local/state/kubeup`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "KUBEUP_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "KUBEUP_STATE_DIR";

const APP: &str = "kubeup";

/// Get the kubeup config directory path
pub fn config_dir() -> Result<PathBuf> {
    resolve(
        ENV_CONFIG_DIR,
        std::env::var(ENV_CONFIG_DIR).ok(),
        std::env::var("XDG_CONFIG_HOME").ok(),
        &[".config"],
    )
}

/// Get the kubeup state directory path
pub fn state_dir() -> Result<PathBuf> {
    resolve(
        ENV_STATE_DIR,
        std::env::var(ENV_STATE_DIR).ok(),
        std::env::var("XDG_STATE_HOME").ok(),
        &[".local", "state"],
    )
}

/// Resolve a directory from an override, an XDG base and a home fallback
fn resolve(
    env_name: &str,
    override_dir: Option<String>,
    xdg_base: Option<String>,
    home_parts: &[&str],
) -> Result<PathBuf> {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        let path = expand(&dir);
        log::debug!("Using directory from {}: {}", env_name, path.display());
        return Ok(path);
    }

    if let Some(base) = xdg_base.filter(|d| !d.is_empty()) {
        let path = PathBuf::from(base).join(APP);
        log::debug!("Using XDG directory: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home_parts
        .iter()
        .fold(home, |acc, part| acc.join(part))
        .join(APP);
    log::debug!("Using default directory: {}", path.display());
    Ok(path)
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left as written.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let path = resolve(
            ENV_CONFIG_DIR,
            Some("/custom/config".into()),
            Some("/xdg".into()),
            &[".config"],
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("/custom/config"));
    }

    #[test]
    fn test_override_with_tilde() {
        let home = dirs::home_dir().unwrap();
        let path = resolve(ENV_CONFIG_DIR, Some("~/clusters".into()), None, &[".config"]).unwrap();
        assert_eq!(path, home.join("clusters"));
    }

    #[test]
    fn test_xdg_base() {
        let path = resolve(ENV_STATE_DIR, None, Some("/tmp/xdg-state".into()), &[".local", "state"])
            .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/xdg-state/kubeup"));
    }

    #[test]
    fn test_empty_override_ignored() {
        let path = resolve(ENV_STATE_DIR, Some(String::new()), Some("/xdg".into()), &[]).unwrap();
        assert_eq!(path, PathBuf::from("/xdg/kubeup"));
    }

    #[test]
    fn test_home_default() {
        let home = dirs::home_dir().unwrap();
        let path = resolve(ENV_STATE_DIR, None, None, &[".local", "state"]).unwrap();
        assert_eq!(path, home.join(".local").join("state").join("kubeup"));
    }

    #[test]
    fn test_expand_absolute_and_unknown_var() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(
            expand("/path/$KUBEUP_NONEXISTENT_VAR_12345/file"),
            PathBuf::from("/path/$KUBEUP_NONEXISTENT_VAR_12345/file")
        );
    }
}
