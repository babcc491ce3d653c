//! # Reconcile
//!
//! A desired-state task reconciliation engine.
//!
//! Every infrastructure object is a *task*. Tasks link to each other, the
//! links form a dependency graph, and one generic lifecycle drives every
//! task to convergence: find the actual object, normalize the desired one,
//! diff the two, and render the difference through the active target.
//!
//! ## Core Concepts
//!
//! - **Task**: one desired object (a key pair, a node file, a systemd unit)
//! - **Link**: typed reference from one task to another; also a graph edge
//! - **TaskGraph**: the validated dependency DAG of a [`TaskSet`]
//! - **Target**: where changes are rendered: a live cloud API, a generated
//!   Terraform configuration, the local node, or a dry-run recorder
//! - **Executor**: walks the graph on a bounded worker pool
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{Context, DryRunTarget, Target, TaskSet, execute_simple};
//!
//! let mut tasks = TaskSet::new();
//! tasks.add(my_task)?;
//!
//! let ctx = Context::new();
//! let target = Target::DryRun(DryRunTarget::new());
//! let result = execute_simple(&mut tasks, &ctx, &target)?;
//!
//! for change in target.as_dry_run().unwrap().changes() {
//!     println!("{} {}", change.action, change.key);
//! }
//! ```
//!
//! ## Provider Traits
//!
//! The crate never talks to a backend itself:
//!
//! - [`Cloud`]: session handle supplied by the caller, downcast by plugins
//! - [`ProgressCallback`]: receives progress updates
//! - [`RetryCallback`]: observes retries of transient backend errors

pub mod changes;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
mod lifecycle;
pub mod retry;
pub mod target;
pub mod task;
pub mod types;

// Re-export main types at crate root
pub use changes::{Delta, changed_fields};
pub use context::{
    CancelToken, Cloud, Context, NoProgress, ProgressCallback, Registry, TagCache, Tags,
    TaskOutput,
};
pub use error::{EngineError, ErrorCategory, TaskError};
pub use executor::{execute, execute_simple};
pub use graph::TaskGraph;
pub use lifecycle::Phase;
pub use retry::{LogCallback, NoCallback, RetryCallback, with_retry, with_retry_logged};
pub use target::{
    Action, CloudTarget, DryRunTarget, LocalTarget, Literal, PlanSummary, PlannedChange, Target,
    TargetKind, TerraformDocument, TerraformTarget, preflight,
};
pub use task::{AnyTask, BoxedTask, Link, Renderers, Task, TaskSet};
pub use types::{
    ExecuteOptions, Lifecycle, RetryConfig, RunResult, RunSummary, TaskKey, TaskReport,
    TaskStatus,
};
