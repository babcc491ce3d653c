//! Run context and provider traits
//!
//! A [`Context`] is built once per run and shared by every task lifecycle
//! call. It owns the session handle, the registry of rendered task outputs,
//! the tag cache and the cancellation token. Nothing in here is global; a
//! new run gets a fresh context.

use crate::error::TaskError;
use crate::target::terraform::Literal;
use crate::types::{TaskKey, TaskStatus};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Session handle for a backend (a cloud account, a node host, ...).
///
/// The engine never constructs one; callers pass it in through
/// [`Context::with_cloud`] and plugins downcast it to the concrete type they
/// know how to talk to with [`Context::cloud_as`].
pub trait Cloud: Send + Sync + fmt::Debug {
    /// Provider name, e.g. "aws"
    fn provider(&self) -> &'static str;

    /// Region or location the session is bound to
    fn region(&self) -> &str;

    /// Access to the concrete type for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Shared flag used to abort a run.
///
/// Cancelling stops the scheduler from starting new tasks; tasks already
/// running finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Values a rendered task exposes to the tasks that depend on it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    /// Identifier assigned by the backend, if known
    pub id: Option<String>,
    /// Reference to the object inside a generated configuration document
    pub terraform: Option<Literal>,
}

/// Outputs of tasks that completed in this run.
///
/// Written by the scheduler after a task renders (or is confirmed
/// unchanged); read by dependents through [`crate::Link::resolve`].
#[derive(Debug, Default)]
pub struct Registry {
    outputs: RwLock<HashMap<TaskKey, TaskOutput>>,
}

impl Registry {
    /// Record the output of a completed task
    pub fn publish(&self, key: TaskKey, output: TaskOutput) {
        self.outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, output);
    }

    /// Output of a completed task
    pub fn get(&self, key: &TaskKey) -> Option<TaskOutput> {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Whether the task completed in this run
    pub fn contains(&self, key: &TaskKey) -> bool {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of completed tasks
    pub fn len(&self) -> usize {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no task completed yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tags keyed by backend resource ID
pub type Tags = BTreeMap<String, String>;

/// Memoized tag lookups, shared by concurrently running tasks
#[derive(Debug, Default)]
pub struct TagCache {
    entries: Mutex<HashMap<String, Tags>>,
}

impl TagCache {
    /// Cached tags for a resource
    pub fn get(&self, resource_id: &str) -> Option<Tags> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource_id)
            .cloned()
    }

    /// Return cached tags, or load and cache them.
    ///
    /// The lock is not held while `load` runs, so two tasks may load the same
    /// resource concurrently; the last writer wins with identical data.
    pub fn get_or_load<F>(&self, resource_id: &str, load: F) -> Result<Tags, TaskError>
    where
        F: FnOnce() -> Result<Tags, TaskError>,
    {
        if let Some(tags) = self.get(resource_id) {
            return Ok(tags);
        }
        let tags = load()?;
        self.insert(resource_id, tags.clone());
        Ok(tags)
    }

    /// Replace the cached tags for a resource
    pub fn insert(&self, resource_id: &str, tags: Tags) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource_id.to_string(), tags);
    }

    /// Drop the cached tags for a resource
    pub fn invalidate(&self, resource_id: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(resource_id);
    }
}

/// Context passed to every task lifecycle call
#[derive(Debug)]
pub struct Context {
    cloud: Option<Arc<dyn Cloud>>,
    registry: Registry,
    tags: TagCache,
    cancel: CancelToken,
    check_existing: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create a context without a session handle
    pub fn new() -> Self {
        Self {
            cloud: None,
            registry: Registry::default(),
            tags: TagCache::default(),
            cancel: CancelToken::new(),
            check_existing: true,
        }
    }

    /// Attach the session handle
    pub fn with_cloud(mut self, cloud: Arc<dyn Cloud>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// When false, Find is skipped and every object is treated as absent
    pub fn with_check_existing(mut self, check_existing: bool) -> Self {
        self.check_existing = check_existing;
        self
    }

    /// The session handle, or an error if the run has none
    pub fn cloud(&self) -> Result<&dyn Cloud, TaskError> {
        self.cloud
            .as_deref()
            .ok_or_else(|| TaskError::Other("no cloud session available in this run".to_string()))
    }

    /// The session handle downcast to a concrete type
    pub fn cloud_as<C: Cloud + 'static>(&self) -> Result<&C, TaskError> {
        let cloud = self.cloud()?;
        cloud.as_any().downcast_ref::<C>().ok_or_else(|| {
            TaskError::Other(format!(
                "cloud session is {} ({}), not the expected type",
                cloud.provider(),
                cloud.region()
            ))
        })
    }

    /// Outputs of tasks completed so far
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Shared tag cache
    pub fn tags(&self) -> &TagCache {
        &self.tags
    }

    /// Token that cancels this run
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether Find is called before diffing
    pub fn check_existing(&self) -> bool {
        self.check_existing
    }
}

/// Progress callback for execution
///
/// Always called from the scheduling thread, never from workers.
pub trait ProgressCallback {
    /// Called once before the first task starts
    fn on_run_start(&mut self, total: usize);

    /// Called when a task is handed to a worker
    fn on_task_start(&mut self, key: &TaskKey);

    /// Called when a task reaches a terminal status, including tasks skipped
    /// without starting
    fn on_task_complete(&mut self, key: &TaskKey, status: &TaskStatus);

    /// Called once after the last task completed
    fn on_run_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_task_start(&mut self, _key: &TaskKey) {}
    fn on_task_complete(&mut self, _key: &TaskKey, _status: &TaskStatus) {}
    fn on_run_complete(&mut self) {}
}
