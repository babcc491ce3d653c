//! Task contract for declarative infrastructure objects
//!
//! A task describes one desired object: a key pair, a file on a node, a
//! systemd unit. Every resource type implements [`Task`], which provides:
//! - Identity (kind and name) and links to the tasks it depends on
//! - State detection (`find`) and derived-field filling (`normalize`)
//! - Change-set construction and validation (`changes`, `check_changes`)
//! - A table of render operations, one per supported target
//!
//! # Example
//!
//! ```ignore
//! use reconcile::{Context, Delta, Renderers, Task, TaskError};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Bucket { name: String, region: Option<String> }
//!
//! #[derive(Debug, Default, serde::Serialize)]
//! struct BucketChanges { region: Option<String> }
//!
//! impl Task for Bucket {
//!     const KIND: &'static str = "Bucket";
//!     type Changes = BucketChanges;
//!
//!     fn name(&self) -> String { self.name.clone() }
//!
//!     fn find(&mut self, ctx: &Context) -> Result<Option<Self>, TaskError> {
//!         // Query the backend; Ok(None) when the bucket does not exist
//!         Ok(None)
//!     }
//!
//!     fn changes(actual: Option<&Self>, expected: &Self) -> BucketChanges {
//!         let d = Delta::new(actual, expected);
//!         BucketChanges { region: d.opt(|b| &b.region) }
//!     }
//!
//!     fn renderers() -> Renderers<Self> {
//!         Renderers::new().cloud(|_ctx, _t, _a, _e, _changes| Ok(()))
//!     }
//! }
//! ```

use crate::context::{Context, TaskOutput};
use crate::error::{EngineError, TaskError};
use crate::lifecycle;
use crate::target::{CloudTarget, LocalTarget, Target, TargetKind, TerraformTarget};
use crate::types::{Lifecycle, TaskKey, TaskStatus};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Core trait for declarative tasks
pub trait Task: fmt::Debug + PartialEq + Send + Sync + Sized + 'static {
    /// Task kind, e.g. "SSHKey"; part of every key
    const KIND: &'static str;

    /// Change-set type: one `Option` per diffable field
    type Changes: Serialize + Default + fmt::Debug + Send;

    /// Name identifying the object within its kind
    fn name(&self) -> String;

    /// Key used for graph edges, the registry and reports
    fn key(&self) -> TaskKey {
        TaskKey::new(Self::KIND, self.name())
    }

    /// What the engine may do with this task
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Sync
    }

    /// Tasks that must complete before this one starts
    ///
    /// Usually the keys of the task's [`Link`] fields.
    fn dependencies(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    /// Look up the actual object.
    ///
    /// Return `Ok(None)` when the object is confirmed absent; backend failures
    /// must be errors, never `None`. May record backend-assigned values (such
    /// as an ID) on `self`.
    fn find(&mut self, ctx: &Context) -> Result<Option<Self>, TaskError>;

    /// Fill in derived desired-state fields. Must be deterministic.
    ///
    /// Runs after every dependency completed, so links can be resolved here.
    fn normalize(&mut self, _ctx: &Context) -> Result<(), TaskError> {
        Ok(())
    }

    /// Build the change-set between `actual` and `expected`
    fn changes(actual: Option<&Self>, expected: &Self) -> Self::Changes;

    /// Reject changes that cannot be applied, e.g. immutable fields
    fn check_changes(
        _actual: Option<&Self>,
        _expected: &Self,
        _changes: &Self::Changes,
    ) -> Result<(), TaskError> {
        Ok(())
    }

    /// Render operations this task type supports
    fn renderers() -> Renderers<Self>;

    /// Values published to dependents once the task completed
    fn output(&self) -> TaskOutput {
        TaskOutput::default()
    }
}

/// Render into a live cloud API
pub type CloudRender<T> =
    fn(&Context, &CloudTarget, Option<&T>, &mut T, &<T as Task>::Changes) -> Result<(), TaskError>;

/// Render into a generated configuration document
pub type TerraformRender<T> = fn(
    &Context,
    &TerraformTarget,
    Option<&T>,
    &mut T,
    &<T as Task>::Changes,
) -> Result<(), TaskError>;

/// Render onto the local node
pub type LocalRender<T> =
    fn(&Context, &LocalTarget, Option<&T>, &mut T, &<T as Task>::Changes) -> Result<(), TaskError>;

/// Table of render operations for one task type.
///
/// The dispatcher selects an entry by the active target's kind; a missing
/// entry means the task type cannot run against that target. Dry-run is
/// handled by the engine and always available.
pub struct Renderers<T: Task> {
    cloud: Option<CloudRender<T>>,
    terraform: Option<TerraformRender<T>>,
    local: Option<LocalRender<T>>,
}

impl<T: Task> Default for Renderers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Task> Renderers<T> {
    /// Table with no render operations
    pub fn new() -> Self {
        Self {
            cloud: None,
            terraform: None,
            local: None,
        }
    }

    /// Register the live cloud render operation
    pub fn cloud(mut self, render: CloudRender<T>) -> Self {
        self.cloud = Some(render);
        self
    }

    /// Register the generated-configuration render operation
    pub fn terraform(mut self, render: TerraformRender<T>) -> Self {
        self.terraform = Some(render);
        self
    }

    /// Register the local node render operation
    pub fn local(mut self, render: LocalRender<T>) -> Self {
        self.local = Some(render);
        self
    }

    /// Whether a render operation exists for the target kind
    pub fn supports(&self, kind: TargetKind) -> bool {
        match kind {
            TargetKind::Cloud => self.cloud.is_some(),
            TargetKind::Terraform => self.terraform.is_some(),
            TargetKind::Local => self.local.is_some(),
            TargetKind::DryRun => true,
        }
    }

    /// Target kinds this table can render to
    pub fn kinds(&self) -> Vec<TargetKind> {
        TargetKind::ALL
            .into_iter()
            .filter(|k| self.supports(*k))
            .collect()
    }

    /// Invoke the operation matching the active target
    pub(crate) fn render(
        &self,
        ctx: &Context,
        target: &Target,
        actual: Option<&T>,
        expected: &mut T,
        changes: &T::Changes,
    ) -> Result<(), TaskError> {
        let unsupported = || TaskError::Unsupported {
            kind: T::KIND,
            target: target.kind(),
        };

        match target {
            Target::Cloud(t) => {
                let render = self.cloud.ok_or_else(unsupported)?;
                render(ctx, t, actual, expected, changes)
            }
            Target::Terraform(t) => {
                let render = self.terraform.ok_or_else(unsupported)?;
                render(ctx, t, actual, expected, changes)
            }
            Target::Local(t) => {
                let render = self.local.ok_or_else(unsupported)?;
                render(ctx, t, actual, expected, changes)
            }
            Target::DryRun(t) => {
                t.record(Task::key(expected), actual.is_none(), changes);
                Ok(())
            }
        }
    }
}

/// Typed reference from one task to another.
///
/// A link is both a configuration value (the target's name) and a
/// dependency edge. Values the target produced at render time are read with
/// [`Link::resolve`] once the target completed.
pub struct Link<T> {
    name: String,
    _target: PhantomData<fn() -> T>,
}

impl<T: Task> Link<T> {
    /// Link to the task of kind `T` with this name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _target: PhantomData,
        }
    }

    /// Link to an existing task value
    pub fn to(task: &T) -> Self {
        Self::new(task.name())
    }

    /// Name of the linked task
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of the linked task
    pub fn key(&self) -> TaskKey {
        TaskKey::new(T::KIND, self.name.clone())
    }

    /// Output the linked task published in this run
    pub fn resolve(&self, ctx: &Context) -> Result<TaskOutput, TaskError> {
        ctx.registry().get(&self.key()).ok_or_else(|| {
            TaskError::Other(format!("{} has not completed in this run", self.key()))
        })
    }
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _target: PhantomData,
        }
    }
}

impl<T> PartialEq for Link<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for Link<T> {}

impl<T: Task> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({})", self.key())
    }
}

/// Object-safe view of a task, used for graph storage and scheduling
pub trait AnyTask: fmt::Debug + Send + Sync {
    /// Task key
    fn key(&self) -> TaskKey;

    /// Keys of the tasks this one depends on
    fn dependencies(&self) -> Vec<TaskKey>;

    /// Lifecycle policy
    fn lifecycle(&self) -> Lifecycle;

    /// Whether the task type can render to the target kind
    fn supports(&self, kind: TargetKind) -> bool;

    /// Run the full lifecycle against the target
    fn run(&mut self, ctx: &Context, target: &Target) -> Result<TaskStatus, TaskError>;

    /// Compare with another task of any type
    fn same_as(&self, other: &dyn AnyTask) -> bool;

    /// Access to the concrete type
    fn as_any(&self) -> &dyn Any;
}

impl<T: Task> AnyTask for T {
    fn key(&self) -> TaskKey {
        Task::key(self)
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        Task::dependencies(self)
    }

    fn lifecycle(&self) -> Lifecycle {
        Task::lifecycle(self)
    }

    fn supports(&self, kind: TargetKind) -> bool {
        T::renderers().supports(kind)
    }

    fn run(&mut self, ctx: &Context, target: &Target) -> Result<TaskStatus, TaskError> {
        lifecycle::run(self, ctx, target)
    }

    fn same_as(&self, other: &dyn AnyTask) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A boxed task for type-erased storage
pub type BoxedTask = Box<dyn AnyTask>;

/// The declared tasks of a run, in insertion order.
///
/// Model builders add tasks here; the engine borrows the set mutably for the
/// duration of a run.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Vec<BoxedTask>,
    index: HashMap<TaskKey, usize>,
}

impl TaskSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task.
    ///
    /// Adding a task identical to one already present is a no-op; adding a
    /// different task under an existing key is an error.
    pub fn add<T: Task>(&mut self, task: T) -> Result<(), EngineError> {
        self.add_boxed(Box::new(task))
    }

    /// Add an already boxed task, with the same rules as [`TaskSet::add`]
    pub fn add_boxed(&mut self, task: BoxedTask) -> Result<(), EngineError> {
        let key = task.key();
        if let Some(&existing) = self.index.get(&key) {
            if self.tasks[existing].same_as(task.as_ref()) {
                log::debug!("Ignoring identical duplicate task {}", key);
                return Ok(());
            }
            return Err(EngineError::DuplicateTask(key));
        }
        self.index.insert(key, self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &dyn AnyTask> {
        self.tasks.iter().map(AsRef::as_ref)
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<TaskKey> {
        self.tasks.iter().map(|t| t.key()).collect()
    }

    /// Look up a task by key
    pub fn get(&self, key: &TaskKey) -> Option<&dyn AnyTask> {
        self.index.get(key).map(|&i| self.tasks[i].as_ref())
    }

    /// Look up a task by name, downcast to its concrete type
    pub fn get_as<T: Task>(&self, name: &str) -> Option<&T> {
        self.get(&TaskKey::new(T::KIND, name))?
            .as_any()
            .downcast_ref::<T>()
    }

    /// Keep only the tasks matching a predicate
    pub fn retain<F>(&mut self, predicate: F)
    where
        F: Fn(&dyn AnyTask) -> bool,
    {
        self.tasks.retain(|t| predicate(t.as_ref()));
        self.index = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.key(), i))
            .collect();
    }

    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = &mut BoxedTask> {
        self.tasks.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        name: String,
        text: Option<String>,
        after: Vec<Link<Note>>,
    }

    #[derive(Debug, Default, Serialize)]
    struct NoteChanges {
        text: Option<String>,
    }

    impl Task for Note {
        const KIND: &'static str = "Note";
        type Changes = NoteChanges;

        fn name(&self) -> String {
            self.name.clone()
        }

        fn dependencies(&self) -> Vec<TaskKey> {
            self.after.iter().map(Link::key).collect()
        }

        fn find(&mut self, _ctx: &Context) -> Result<Option<Self>, TaskError> {
            Ok(None)
        }

        fn changes(actual: Option<&Self>, expected: &Self) -> NoteChanges {
            NoteChanges {
                text: crate::Delta::new(actual, expected).opt(|n| &n.text),
            }
        }

        fn renderers() -> Renderers<Self> {
            Renderers::new().local(|_, _, _, _, _| Ok(()))
        }
    }

    fn note(name: &str, text: &str) -> Note {
        Note {
            name: name.into(),
            text: Some(text.into()),
            after: Vec::new(),
        }
    }

    #[test]
    fn test_duplicate_identical_is_ignored() {
        let mut set = TaskSet::new();
        set.add(note("a", "hello")).unwrap();
        set.add(note("a", "hello")).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_duplicate_different_is_rejected() {
        let mut set = TaskSet::new();
        set.add(note("a", "hello")).unwrap();
        let err = set.add(note("a", "bye")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTask(key) if key == TaskKey::new("Note", "a")));
    }

    #[test]
    fn test_get_as_downcasts() {
        let mut set = TaskSet::new();
        set.add(note("a", "hello")).unwrap();
        assert_eq!(
            set.get_as::<Note>("a").and_then(|n| n.text.as_deref()),
            Some("hello")
        );
        assert!(set.get_as::<Note>("b").is_none());
    }

    #[test]
    fn test_link_key_and_dependencies() {
        let first = note("first", "1");
        let mut second = note("second", "2");
        second.after.push(Link::to(&first));

        assert_eq!(Task::dependencies(&second), vec![TaskKey::new("Note", "first")]);
    }

    #[test]
    fn test_renderers_capabilities() {
        let renderers = Note::renderers();
        assert!(renderers.supports(TargetKind::Local));
        assert!(renderers.supports(TargetKind::DryRun));
        assert!(!renderers.supports(TargetKind::Cloud));
        assert_eq!(renderers.kinds(), vec![TargetKind::Local, TargetKind::DryRun]);
    }

    #[test]
    fn test_retain_rebuilds_index() {
        let mut set = TaskSet::new();
        set.add(note("a", "1")).unwrap();
        set.add(note("b", "2")).unwrap();
        set.retain(|t| t.key().name != "a");
        assert_eq!(set.keys(), vec![TaskKey::new("Note", "b")]);
        assert!(set.get(&TaskKey::new("Note", "b")).is_some());
    }
}
