//! Per-task lifecycle: Find, Normalize, diff, CheckChanges, Render.
//!
//! This is the single algorithm every task type goes through, whatever the
//! backend. Lifecycle policies decide how far a task may get.

use crate::changes::changed_fields;
use crate::context::Context;
use crate::error::TaskError;
use crate::target::Target;
use crate::task::Task;
use crate::types::{Lifecycle, TaskStatus};
use std::fmt;

/// Lifecycle phase of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Found,
    Normalized,
    Diffed,
    Rendered,
    Skipped,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Found => "found",
            Self::Normalized => "normalized",
            Self::Diffed => "diffed",
            Self::Rendered => "rendered",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Run the lifecycle of one task against the active target.
///
/// Returns the terminal status; errors are the task's own failures and are
/// turned into [`TaskStatus::Failed`] by the scheduler.
pub fn run<T: Task>(task: &mut T, ctx: &Context, target: &Target) -> Result<TaskStatus, TaskError> {
    let key = Task::key(task);
    let lifecycle = task.lifecycle();
    log::debug!("{}: {} (lifecycle {})", key, Phase::Pending, lifecycle);

    let status = advance(task, ctx, target, lifecycle);
    match &status {
        Ok(TaskStatus::Skipped { reason }) => {
            log::debug!("{}: {} ({})", key, Phase::Skipped, reason);
        }
        Ok(TaskStatus::Failed { error }) | Err(error) => {
            log::debug!("{}: {} ({})", key, Phase::Failed, error);
        }
        Ok(status) => log::debug!("{}: {} ({})", key, Phase::Rendered, status),
    }
    status
}

fn advance<T: Task>(
    task: &mut T,
    ctx: &Context,
    target: &Target,
    lifecycle: Lifecycle,
) -> Result<TaskStatus, TaskError> {
    let key = Task::key(task);

    if lifecycle == Lifecycle::Ignore {
        return Ok(TaskStatus::Skipped {
            reason: "lifecycle is Ignore".to_string(),
        });
    }

    let actual = if ctx.check_existing() {
        match task.find(ctx) {
            Ok(actual) => actual,
            Err(e) if lifecycle == Lifecycle::WarnIfInsufficientAccess && e.is_access_denied() => {
                log::warn!("{}: skipping, insufficient access to inspect: {}", key, e);
                return Ok(TaskStatus::Skipped {
                    reason: format!("insufficient access: {e}"),
                });
            }
            Err(e) => return Err(e),
        }
    } else {
        None
    };
    log::debug!(
        "{}: {} ({})",
        key,
        Phase::Found,
        if actual.is_some() { "exists" } else { "absent" }
    );

    if actual.is_none() && lifecycle.requires_existing() {
        return Err(TaskError::NotFound {
            kind: T::KIND,
            name: task.name(),
            lifecycle,
        });
    }

    task.normalize(ctx)?;
    log::debug!("{}: {}", key, Phase::Normalized);

    let changes = T::changes(actual.as_ref(), task);
    let fields = changed_fields(&changes);
    log::debug!("{}: {} ({} field(s) changed)", key, Phase::Diffed, fields.len());

    if actual.is_some() && fields.is_empty() {
        ctx.registry().publish(key, task.output());
        return Ok(TaskStatus::NoChange);
    }

    T::check_changes(actual.as_ref(), task, &changes)?;

    let changed = fields.keys().cloned().collect::<Vec<_>>().join(", ");
    match lifecycle {
        Lifecycle::ExistsAndValidates => {
            return Err(TaskError::Validation(format!(
                "{key} differs from the desired state in [{changed}], and lifecycle {lifecycle} forbids changes"
            )));
        }
        Lifecycle::ExistsAndWarnIfChanges => {
            log::warn!("{}: drift detected in [{}], not applying", key, changed);
            ctx.registry().publish(key, task.output());
            return Ok(TaskStatus::Skipped {
                reason: format!("drift in [{changed}] not applied ({lifecycle})"),
            });
        }
        _ => {}
    }

    if actual.is_none() {
        log::info!("Creating {}", key);
    } else {
        log::info!("Updating {} [{}]", key, changed);
    }
    T::renderers().render(ctx, target, actual.as_ref(), task, &changes)?;

    ctx.registry().publish(key, task.output());
    Ok(if actual.is_none() {
        TaskStatus::Created
    } else {
        TaskStatus::Updated
    })
}
