//! Error types for task reconciliation.
//!
//! Errors come in two layers:
//! - [`TaskError`] is attached to a single task. It is categorized so the
//!   retry layer and the lifecycle policies can tell a confirmed absence from
//!   a backend outage.
//! - [`EngineError`] covers pre-flight and run-level failures (duplicate
//!   tasks, dangling references, cycles, missing render capabilities). These
//!   abort the run before any task renders.

use crate::target::TargetKind;
use crate::types::{Lifecycle, TaskKey};
use std::fmt;
use thiserror::Error;

/// Categories of backend errors.
///
/// Plugins map provider-specific error codes into one of these so the
/// engine can decide on retries and lifecycle handling without knowing the
/// provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The object does not exist (normally turned into an absent Find result)
    NotFound,
    /// Throttling, timeouts, connection resets
    Transient,
    /// The caller lacks permission to inspect or mutate the object
    AccessDenied,
    /// The backend rejected the request as invalid
    Rejected,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Short description used in error messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::Transient => "transient backend error",
            Self::AccessDenied => "access denied",
            Self::Rejected => "request rejected",
            Self::Other => "backend error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Errors produced by a single task's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// A backend call failed
    #[error("{category}: {message}")]
    Backend {
        /// Classification used for retries and lifecycle policies
        category: ErrorCategory,
        /// Provider message
        message: String,
    },

    /// A field that cannot change on an existing object was changed
    #[error("cannot change field {field:?} on an existing object (from {old} to {new})")]
    CannotChangeField {
        /// Field name
        field: &'static str,
        /// Value reported by the backend
        old: String,
        /// Desired value
        new: String,
    },

    /// Find matched more than one object for a unique identity
    #[error("found {count} {kind} objects matching {name:?}, expected at most one")]
    Ambiguous {
        /// Task kind
        kind: &'static str,
        /// Identity that was looked up
        name: String,
        /// Number of candidates returned
        count: usize,
    },

    /// The object must exist but was not found
    #[error("{kind} {name:?} was not found, but lifecycle {lifecycle} requires it to exist")]
    NotFound {
        /// Task kind
        kind: &'static str,
        /// Identity that was looked up
        name: String,
        /// Policy that required the object
        lifecycle: Lifecycle,
    },

    /// The task definition or the observed state failed validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// The task has no render implementation for the active target
    #[error("{kind} cannot be rendered to the {target} target")]
    Unsupported {
        /// Task kind
        kind: &'static str,
        /// Active target
        target: TargetKind,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl TaskError {
    /// Create a backend error with an explicit category.
    pub fn backend(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::Backend {
            category,
            message: message.into(),
        }
    }

    /// Create a retryable backend error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::backend(ErrorCategory::Transient, message)
    }

    /// Create an access-denied backend error.
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::backend(ErrorCategory::AccessDenied, message)
    }

    /// Report that `field` cannot change from `old` to `new`.
    pub fn cannot_change(field: &'static str, old: impl fmt::Debug, new: impl fmt::Debug) -> Self {
        Self::CannotChangeField {
            field,
            old: format!("{old:?}"),
            new: format!("{new:?}"),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Backend { category, .. } => *category,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether the caller lacked permission.
    pub fn is_access_denied(&self) -> bool {
        self.category() == ErrorCategory::AccessDenied
    }
}

/// Run-level errors. Any of these aborts the run before a task renders,
/// except [`EngineError::UnresolvedReference`], which is raised when a
/// generated document is finalized.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Two different task definitions share a key
    #[error("task {0} is declared twice with different definitions")]
    DuplicateTask(TaskKey),

    /// A task links to a key that is not in the task set
    #[error("task {task} references {missing}, which is not declared")]
    DanglingReference {
        /// Task holding the link
        task: TaskKey,
        /// Key the link points at
        missing: TaskKey,
    },

    /// The dependency graph has a cycle
    #[error("dependency cycle: {}", format_chain(.chain))]
    Cycle {
        /// Shortest chain of tasks forming the cycle; first and last are equal
        chain: Vec<TaskKey>,
    },

    /// Tasks lacking a render implementation for the active target
    #[error("cannot render to the {target} target: {}", format_list(.tasks))]
    UnsupportedTarget {
        /// Active target
        target: TargetKind,
        /// Offending tasks
        tasks: Vec<TaskKey>,
    },

    /// A forward reference in a generated document points at nothing
    #[error("{owner} references {reference}, which is not declared in the generated configuration")]
    UnresolvedReference {
        /// Resource holding the reference
        owner: String,
        /// The dangling reference
        reference: String,
    },

    /// The same generated resource was declared twice
    #[error("generated configuration already contains {resource_type}.{name}")]
    DuplicateResource {
        /// Resource type, e.g. `aws_key_pair`
        resource_type: String,
        /// Resource name
        name: String,
    },

    /// The worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    ThreadPool(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_chain(chain: &[TaskKey]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_list(tasks: &[TaskKey]) -> String {
    tasks
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
