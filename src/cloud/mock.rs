//! File-backed EC2 stand-in
//!
//! Keeps key pairs and tags in memory, optionally persisted as JSON so
//! consecutive CLI runs see each other's changes. Faults can be injected per
//! operation to exercise error handling.

use super::{ApiError, Ec2, KeyPairInfo};
use crate::pki::PublicKey;
use anyhow::{Context, Result};
use reconcile::Tags;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Environment variable holding injected faults, `op=Code[,op=Code]`
pub const ENV_FAULTS: &str = "KUBEUP_MOCK_FAULTS";

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    next_id: u64,
    key_pairs: BTreeMap<String, KeyPairInfo>,
    tags: BTreeMap<String, Tags>,
}

#[derive(Debug, Default)]
pub struct MockEc2 {
    state: Mutex<State>,
    path: Option<PathBuf>,
    faults: HashMap<String, ApiError>,
}

impl MockEc2 {
    /// In-memory only
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state from `path` if it exists; every mutation is written back
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Could not read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid mock cloud state {}", path.display()))?
        } else {
            State::default()
        };
        log::debug!("Mock EC2 state at {}", path.display());
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
            faults: HashMap::new(),
        })
    }

    /// Make every call of `operation` fail with `code`
    pub fn inject(mut self, operation: &str, code: &str) -> Self {
        self.faults.insert(
            operation.to_string(),
            ApiError::new(code, format!("injected fault for {operation}")),
        );
        self
    }

    /// Apply faults from a `op=Code[,op=Code]` spec
    pub fn with_faults(self, spec: &str) -> Self {
        spec.split(',')
            .filter_map(|pair| pair.split_once('='))
            .fold(self, |ec2, (op, code)| ec2.inject(op.trim(), code.trim()))
    }

    fn check_fault(&self, operation: &str) -> Result<(), ApiError> {
        match self.faults.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> Result<T, ApiError>) -> Result<T, ApiError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn save(&self, state: &State) -> Result<(), ApiError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(state)?;
            fs::write(path, json)
        };
        write().map_err(|e| ApiError::new("InternalError", format!("saving mock state: {e}")))
    }
}

/// Fingerprint as EC2 reports it: ed25519 digests carry a trailing `=`
/// and no prefix
fn reported_fingerprint(key: &PublicKey) -> String {
    let fingerprint = key.cloud_fingerprint();
    match fingerprint.strip_prefix("SHA256:") {
        Some(digest) => format!("{digest}="),
        None => fingerprint,
    }
}

impl Ec2 for MockEc2 {
    fn describe_key_pairs(&self, names: &[String]) -> Result<Vec<KeyPairInfo>, ApiError> {
        self.check_fault("describe_key_pairs")?;
        self.with_state(|state| {
            names
                .iter()
                .map(|name| -> Result<KeyPairInfo, ApiError> {
                    let mut info = state.key_pairs.get(name).cloned().ok_or_else(|| {
                        ApiError::new(
                            "InvalidKeyPair.NotFound",
                            format!("The key pair '{name}' does not exist"),
                        )
                    })?;
                    info.tags = state.tags.get(&info.key_pair_id).cloned().unwrap_or_default();
                    Ok(info)
                })
                .collect()
        })
    }

    fn import_key_pair(
        &self,
        name: &str,
        public_key: &str,
        tags: &Tags,
    ) -> Result<KeyPairInfo, ApiError> {
        self.check_fault("import_key_pair")?;
        let key = PublicKey::parse(public_key)
            .map_err(|e| ApiError::new("InvalidKey.Format", e.to_string()))?;

        self.with_state(|state| {
            if state.key_pairs.contains_key(name) {
                return Err(ApiError::new(
                    "InvalidKeyPair.Duplicate",
                    format!("The keypair '{name}' already exists."),
                ));
            }
            state.next_id += 1;
            let info = KeyPairInfo {
                key_pair_id: format!("key-{:017x}", state.next_id),
                key_name: name.to_string(),
                key_fingerprint: reported_fingerprint(&key),
                key_type: key.key_type.as_str().to_string(),
                tags: tags.clone(),
            };
            state.tags.insert(info.key_pair_id.clone(), tags.clone());
            state.key_pairs.insert(name.to_string(), info.clone());
            self.save(state)?;
            Ok(info)
        })
    }

    fn create_tags(&self, resource_id: &str, tags: &Tags) -> Result<(), ApiError> {
        self.check_fault("create_tags")?;
        self.with_state(|state| {
            if !state.key_pairs.values().any(|k| k.key_pair_id == resource_id) {
                return Err(ApiError::new(
                    "InvalidKeyPair.NotFound",
                    format!("The key pair ID '{resource_id}' does not exist"),
                ));
            }
            state
                .tags
                .entry(resource_id.to_string())
                .or_default()
                .extend(tags.clone());
            self.save(state)
        })
    }

    fn describe_tags(&self, resource_id: &str) -> Result<Tags, ApiError> {
        self.check_fault("describe_tags")?;
        self.with_state(|state| Ok(state.tags.get(resource_id).cloned().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::fixtures::ED25519;

    #[test]
    fn test_describe_missing_is_not_found() {
        let ec2 = MockEc2::new();
        let err = ec2.describe_key_pairs(&["ghost".to_string()]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_import_then_describe() {
        let ec2 = MockEc2::new();
        let tags = Tags::from([("Name".to_string(), "k".to_string())]);
        let created = ec2.import_key_pair("k", ED25519, &tags).unwrap();
        assert_eq!(created.key_type, "ed25519");
        assert!(created.key_fingerprint.ends_with('='));
        assert_eq!(created.key_pair_id, "key-00000000000000001");

        let found = ec2.describe_key_pairs(&["k".to_string()]).unwrap();
        assert_eq!(found, vec![created]);
    }

    #[test]
    fn test_duplicate_import_rejected() {
        let ec2 = MockEc2::new();
        ec2.import_key_pair("k", ED25519, &Tags::new()).unwrap();
        let err = ec2.import_key_pair("k", ED25519, &Tags::new()).unwrap_err();
        assert_eq!(err.code, "InvalidKeyPair.Duplicate");
    }

    #[test]
    fn test_state_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("ec2.json");

        let first = MockEc2::open(&path).unwrap();
        first.import_key_pair("k", ED25519, &Tags::new()).unwrap();

        let second = MockEc2::open(&path).unwrap();
        assert_eq!(second.describe_key_pairs(&["k".to_string()]).unwrap().len(), 1);
    }

    #[test]
    fn test_fault_spec() {
        let ec2 = MockEc2::new().with_faults("describe_key_pairs=UnauthorizedOperation, bogus");
        let err = ec2.describe_key_pairs(&["k".to_string()]).unwrap_err();
        assert_eq!(err.code, "UnauthorizedOperation");
        assert!(ec2.describe_tags("key-1").is_ok());
    }
}
