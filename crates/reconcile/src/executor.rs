//! Execution engine - walks the task graph on a bounded worker pool

use crate::context::{Context, NoProgress, ProgressCallback};
use crate::error::{EngineError, TaskError};
use crate::graph::TaskGraph;
use crate::target::{self, Target};
use crate::task::{BoxedTask, TaskSet};
use crate::types::{ExecuteOptions, RunResult, TaskReport, TaskStatus};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Execute every task in the set against the target
///
/// # Arguments
/// * `tasks` - Declared tasks; borrowed mutably for the duration of the run
/// * `ctx` - Run context shared by every lifecycle call
/// * `target` - Active render target
/// * `opts` - Execution options (jobs, fail_fast, timeout)
/// * `progress` - Progress callback
///
/// # Returns
/// One report per task in dependency order. Task failures are reported in
/// the result; an `Err` means the run was rejected before any task started.
pub fn execute<P: ProgressCallback>(
    tasks: &mut TaskSet,
    ctx: &Context,
    target: &Target,
    opts: &ExecuteOptions,
    progress: &mut P,
) -> Result<RunResult, EngineError> {
    let graph = TaskGraph::build(tasks)?;
    target::preflight(tasks, target.kind())?;

    let jobs = opts.jobs.max(1);
    log::info!(
        "Running {} task(s) against the {} target with {} worker(s)",
        graph.len(),
        target.kind(),
        jobs
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .map_err(|e| EngineError::ThreadPool(e.to_string()))?;

    progress.on_run_start(graph.len());
    let mut run = Run::new(&graph, opts);
    let mut slots: Vec<Option<&mut BoxedTask>> = tasks.slots_mut().map(Some).collect();
    let (tx, rx) = mpsc::channel::<(usize, TaskStatus, Duration)>();

    pool.in_place_scope(|scope| {
        let mut running = 0;
        loop {
            run.check_halt(ctx);

            while running < jobs && !run.is_halted() {
                let Some(position) = run.ready.pop_front() else {
                    break;
                };
                let Some(task) = slots[position].take() else {
                    continue;
                };
                progress.on_task_start(graph.key_at(position));
                running += 1;

                let tx = tx.clone();
                scope.spawn(move |_| {
                    let started = Instant::now();
                    let status = run_isolated(task, ctx, target);
                    // The receiver outlives every worker
                    let _ = tx.send((position, status, started.elapsed()));
                });
            }

            if running == 0 {
                break;
            }
            let Ok((position, status, elapsed)) = rx.recv() else {
                break;
            };
            running -= 1;
            run.complete(position, status, elapsed, progress);
        }
    });

    run.skip_remaining(progress);
    progress.on_run_complete();

    let result = run.into_result();
    log::info!(
        "Run finished: {} created, {} updated, {} unchanged, {} skipped, {} failed",
        result.summary.created,
        result.summary.updated,
        result.summary.no_change,
        result.summary.skipped,
        result.summary.failed
    );
    Ok(result)
}

/// Simple execution without callbacks
///
/// For basic use cases where you don't need progress reporting.
pub fn execute_simple(
    tasks: &mut TaskSet,
    ctx: &Context,
    target: &Target,
) -> Result<RunResult, EngineError> {
    execute(tasks, ctx, target, &ExecuteOptions::default(), &mut NoProgress)
}

/// Run one task, turning a panic into a failure of that task only
fn run_isolated(task: &mut BoxedTask, ctx: &Context, target: &Target) -> TaskStatus {
    match panic::catch_unwind(AssertUnwindSafe(|| task.run(ctx, target))) {
        Ok(Ok(status)) => status,
        Ok(Err(error)) => TaskStatus::Failed { error },
        Err(payload) => TaskStatus::Failed {
            error: TaskError::Other(format!("task panicked: {}", panic_message(payload.as_ref()))),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Scheduling state of one run, owned by the coordinating thread
struct Run<'g> {
    graph: &'g TaskGraph,
    fail_fast: bool,
    deadline: Option<Instant>,
    /// Unfinished dependencies per task position
    waiting: Vec<usize>,
    ready: VecDeque<usize>,
    outcomes: Vec<Option<(TaskStatus, Option<Duration>)>>,
    halted: Option<String>,
}

impl<'g> Run<'g> {
    fn new(graph: &'g TaskGraph, opts: &ExecuteOptions) -> Self {
        let waiting: Vec<usize> = (0..graph.len()).map(|p| graph.dependency_count(p)).collect();
        let ready = graph
            .positions()
            .into_iter()
            .filter(|&p| waiting[p] == 0)
            .collect();

        Self {
            graph,
            fail_fast: opts.fail_fast,
            deadline: opts.timeout.map(|t| Instant::now() + t),
            waiting,
            ready,
            outcomes: vec![None; graph.len()],
            halted: None,
        }
    }

    fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    fn check_halt(&mut self, ctx: &Context) {
        if self.halted.is_some() {
            return;
        }
        if ctx.is_cancelled() {
            log::warn!("Run cancelled; not starting further tasks");
            self.halted = Some("run cancelled".to_string());
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            log::warn!("Run timed out; not starting further tasks");
            self.halted = Some("run timed out".to_string());
        }
    }

    fn complete<P: ProgressCallback>(
        &mut self,
        position: usize,
        status: TaskStatus,
        elapsed: Duration,
        progress: &mut P,
    ) {
        let key = self.graph.key_at(position).clone();
        progress.on_task_complete(&key, &status);

        if let TaskStatus::Failed { error } = &status {
            log::error!("{} failed: {}", key, error);
            self.skip_dependents(position, progress);
            if self.fail_fast && self.halted.is_none() {
                self.halted = Some(format!("run halted after {key} failed"));
            }
        } else {
            for dependent in self.graph.dependent_positions(position) {
                // Already skipped through another, failed dependency
                if self.outcomes[dependent].is_some() {
                    continue;
                }
                self.waiting[dependent] -= 1;
                if self.waiting[dependent] == 0 {
                    self.ready.push_back(dependent);
                }
            }
        }
        self.outcomes[position] = Some((status, Some(elapsed)));
    }

    /// Mark every transitive dependent of a failed task as skipped
    fn skip_dependents<P: ProgressCallback>(&mut self, failed: usize, progress: &mut P) {
        let mut queue = VecDeque::from([failed]);
        while let Some(position) = queue.pop_front() {
            let reason = format!("dependency {} did not complete", self.graph.key_at(position));
            for dependent in self.graph.dependent_positions(position) {
                if self.outcomes[dependent].is_some() {
                    continue;
                }
                let status = TaskStatus::Skipped {
                    reason: reason.clone(),
                };
                progress.on_task_complete(self.graph.key_at(dependent), &status);
                self.outcomes[dependent] = Some((status, None));
                queue.push_back(dependent);
            }
        }
    }

    /// Mark tasks that never started after a halt
    fn skip_remaining<P: ProgressCallback>(&mut self, progress: &mut P) {
        let reason = self
            .halted
            .clone()
            .unwrap_or_else(|| "not started".to_string());
        for position in self.graph.positions() {
            if self.outcomes[position].is_none() {
                let status = TaskStatus::Skipped {
                    reason: reason.clone(),
                };
                progress.on_task_complete(self.graph.key_at(position), &status);
                self.outcomes[position] = Some((status, None));
            }
        }
    }

    fn into_result(mut self) -> RunResult {
        let reports = self
            .graph
            .positions()
            .into_iter()
            .filter_map(|position| {
                let (status, elapsed) = self.outcomes[position].take()?;
                Some(TaskReport {
                    key: self.graph.key_at(position).clone(),
                    status,
                    elapsed,
                })
            })
            .collect();
        RunResult::from_reports(reports)
    }
}
