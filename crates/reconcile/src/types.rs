//! Core types for task reconciliation

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Stable identity of a task: its kind plus its name.
///
/// Keys are what dependency links point at, what the registry is indexed by
/// and what every report and error names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    /// Task kind, e.g. "SSHKey" or "File"
    pub kind: &'static str,
    /// Kind-specific name
    pub name: String,
}

impl TaskKey {
    /// Create a key
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// What the engine may do with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Create or update the object to match the desired state
    #[default]
    Sync,
    /// Do not touch the object at all
    Ignore,
    /// Like `Sync`, but skip the task with a warning if the caller may not
    /// inspect the object
    WarnIfInsufficientAccess,
    /// The object must exist and match; never mutate it
    ExistsAndValidates,
    /// The object must exist; drift is logged but not applied
    ExistsAndWarnIfChanges,
}

impl Lifecycle {
    /// All policies, in declaration order
    pub const ALL: [Lifecycle; 5] = [
        Lifecycle::Sync,
        Lifecycle::Ignore,
        Lifecycle::WarnIfInsufficientAccess,
        Lifecycle::ExistsAndValidates,
        Lifecycle::ExistsAndWarnIfChanges,
    ];

    /// Name as used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "Sync",
            Self::Ignore => "Ignore",
            Self::WarnIfInsufficientAccess => "WarnIfInsufficientAccess",
            Self::ExistsAndValidates => "ExistsAndValidates",
            Self::ExistsAndWarnIfChanges => "ExistsAndWarnIfChanges",
        }
    }

    /// Whether the object has to exist before the run
    pub fn requires_existing(&self) -> bool {
        matches!(self, Self::ExistsAndValidates | Self::ExistsAndWarnIfChanges)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown lifecycle {s:?}"))
    }
}

/// Terminal status of one task in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// The object did not exist and was created (or would be, on dry-run)
    Created,
    /// The object existed and was updated (or would be, on dry-run)
    Updated,
    /// The object already matched the desired state
    NoChange,
    /// The task was not rendered
    Skipped { reason: String },
    /// The task failed
    Failed { error: TaskError },
}

impl TaskStatus {
    /// Check if the status represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the status represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }

    /// Short label for reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::NoChange => "no-change",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped { reason } => write!(f, "skipped ({reason})"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Status of one task together with its identity
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub key: TaskKey,
    pub status: TaskStatus,
    /// Wall time spent in the lifecycle; `None` if the task never started
    pub elapsed: Option<Duration>,
}

/// Counts per terminal status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub no_change: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of tasks processed
    pub fn total(&self) -> usize {
        self.created + self.updated + self.no_change + self.skipped + self.failed
    }

    /// Add a status to the summary
    pub fn add_status(&mut self, status: &TaskStatus) {
        match status {
            TaskStatus::Created => self.created += 1,
            TaskStatus::Updated => self.updated += 1,
            TaskStatus::NoChange => self.no_change += 1,
            TaskStatus::Skipped { .. } => self.skipped += 1,
            TaskStatus::Failed { .. } => self.failed += 1,
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    /// One report per task, in dependency order
    pub reports: Vec<TaskReport>,
    pub summary: RunSummary,
}

impl RunResult {
    /// Build a result from reports, computing the summary
    pub fn from_reports(reports: Vec<TaskReport>) -> Self {
        let mut summary = RunSummary::default();
        for report in &reports {
            summary.add_status(&report.status);
        }
        Self { reports, summary }
    }

    /// Overall verdict: false if any task failed
    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }

    /// Status of a single task
    pub fn status(&self, key: &TaskKey) -> Option<&TaskStatus> {
        self.reports
            .iter()
            .find(|r| &r.key == key)
            .map(|r| &r.status)
    }

    /// Failed tasks with their errors
    pub fn failures(&self) -> Vec<(&TaskKey, &TaskError)> {
        self.reports
            .iter()
            .filter_map(|r| match &r.status {
                TaskStatus::Failed { error } => Some((&r.key, error)),
                _ => None,
            })
            .collect()
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of worker threads; 1 walks the graph sequentially
    pub jobs: usize,
    /// Stop starting new tasks after the first failure
    pub fail_fast: bool,
    /// Stop starting new tasks once this much time has passed
    pub timeout: Option<Duration>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            fail_fast: false,
            timeout: None,
        }
    }
}

/// Configuration for retrying transient backend errors
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_parse() {
        assert_eq!("Sync".parse::<Lifecycle>().unwrap(), Lifecycle::Sync);
        assert_eq!(
            "existsandvalidates".parse::<Lifecycle>().unwrap(),
            Lifecycle::ExistsAndValidates
        );
        assert!("Sometimes".parse::<Lifecycle>().is_err());
        for lifecycle in Lifecycle::ALL {
            assert_eq!(lifecycle.to_string().parse::<Lifecycle>().unwrap(), lifecycle);
        }
    }

    #[test]
    fn test_summary_counts() {
        let result = RunResult::from_reports(vec![
            TaskReport {
                key: TaskKey::new("File", "/a"),
                status: TaskStatus::Created,
                elapsed: None,
            },
            TaskReport {
                key: TaskKey::new("File", "/b"),
                status: TaskStatus::Failed {
                    error: TaskError::Other("boom".into()),
                },
                elapsed: None,
            },
            TaskReport {
                key: TaskKey::new("File", "/c"),
                status: TaskStatus::NoChange,
                elapsed: None,
            },
        ]);

        assert_eq!(result.summary.total(), 3);
        assert_eq!(result.summary.total_changes(), 1);
        assert!(!result.is_success());
        assert_eq!(result.failures().len(), 1);
        assert_eq!(
            result.status(&TaskKey::new("File", "/c")),
            Some(&TaskStatus::NoChange)
        );
    }

    #[test]
    fn test_retry_delay_backoff() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(5));
    }
}
