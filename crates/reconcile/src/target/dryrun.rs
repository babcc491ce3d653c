//! Dry-run target: records change-sets instead of rendering them

use crate::changes::changed_fields;
use crate::types::TaskKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// What a planned change would do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
        }
    }
}

/// A change the run would have rendered
#[derive(Debug, Clone, Serialize)]
pub struct PlannedChange {
    /// Task the change belongs to
    #[serde(serialize_with = "serialize_key")]
    pub key: TaskKey,
    pub action: Action,
    /// Changed fields with their desired values
    pub fields: BTreeMap<String, Value>,
}

fn serialize_key<S: serde::Serializer>(key: &TaskKey, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(key)
}

/// Target that never touches a backend
#[derive(Debug, Default)]
pub struct DryRunTarget {
    changes: Mutex<Vec<PlannedChange>>,
}

impl DryRunTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the change-set of one task
    pub fn record<C: Serialize>(&self, key: TaskKey, is_create: bool, changes: &C) {
        let action = if is_create {
            Action::Create
        } else {
            Action::Update
        };
        let fields = changed_fields(changes);
        log::debug!("Planned {} of {} ({} field(s))", action, key, fields.len());
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PlannedChange {
                key,
                action,
                fields,
            });
    }

    /// Recorded changes, sorted by task key
    pub fn changes(&self) -> Vec<PlannedChange> {
        let mut changes = self
            .changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        changes.sort_by(|a, b| a.key.cmp(&b.key));
        changes
    }

    /// Counts of the recorded changes
    pub fn summary(&self) -> PlanSummary {
        PlanSummary::from_changes(&self.changes())
    }
}

/// Plan summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    /// Number of objects to create
    pub creates: usize,
    /// Number of objects to update
    pub updates: usize,
}

impl PlanSummary {
    /// Create a summary from a list of planned changes
    pub fn from_changes(changes: &[PlannedChange]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.action {
                Action::Create => summary.creates += 1,
                Action::Update => summary.updates += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.creates + self.updates
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group planned changes by task kind
pub fn group_by_kind(changes: &[PlannedChange]) -> HashMap<&'static str, Vec<&PlannedChange>> {
    let mut groups: HashMap<&'static str, Vec<&PlannedChange>> = HashMap::new();
    for change in changes {
        groups.entry(change.key.kind).or_default().push(change);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct FileChanges {
        contents: Option<String>,
        mode: Option<String>,
    }

    #[test]
    fn test_record_and_summarize() {
        let target = DryRunTarget::new();
        target.record(
            TaskKey::new("File", "/etc/b"),
            false,
            &FileChanges {
                contents: None,
                mode: Some("0644".into()),
            },
        );
        target.record(
            TaskKey::new("File", "/etc/a"),
            true,
            &FileChanges {
                contents: Some("x".into()),
                mode: Some("0644".into()),
            },
        );
        target.record(
            TaskKey::new("Service", "kubelet.service"),
            true,
            &FileChanges {
                contents: Some("[Unit]".into()),
                mode: None,
            },
        );

        let changes = target.changes();
        assert_eq!(changes[0].key.name, "/etc/a");
        assert_eq!(changes[1].fields.keys().collect::<Vec<_>>(), ["mode"]);

        let summary = target.summary();
        assert_eq!(summary, PlanSummary { creates: 2, updates: 1 });
        assert!(summary.has_changes());

        let groups = group_by_kind(&changes);
        assert_eq!(groups["File"].len(), 2);
        assert_eq!(groups["Service"].len(), 1);
    }

    #[test]
    fn test_planned_change_serializes_key_as_string() {
        let change = PlannedChange {
            key: TaskKey::new("SSHKey", "admin"),
            action: Action::Create,
            fields: BTreeMap::new(),
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["key"], "SSHKey/admin");
        assert_eq!(json["action"], "create");
    }
}
