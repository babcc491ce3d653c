//! Run orchestration - plan, confirm, apply, report

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use reconcile::{
    Context, DryRunTarget, ExecuteOptions, NoProgress, PlannedChange, RunResult, Target,
    TaskReport, TaskSet, TaskStatus, TerraformTarget, execute,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::differ::display_plan;
use crate::progress::{RunProgress, status_symbol};
use crate::ui;

/// Builds a fresh task set for each pass of a run
pub type BuildFn<'a> = &'a dyn Fn() -> Result<TaskSet>;

/// Builds a fresh context for each pass of a run
pub type ContextFn<'a> = &'a dyn Fn() -> Context;

/// Options for a run (kubeup-specific, includes `yes` and `quiet`)
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of parallel jobs
    pub jobs: usize,
    /// Stop starting tasks after the first failure
    pub fail_fast: bool,
    /// Stop starting tasks after this long
    pub timeout: Option<Duration>,
    /// Skip confirmation prompts
    pub yes: bool,
    /// No progress bar
    pub quiet: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            fail_fast: false,
            timeout: None,
            yes: false,
            quiet: false,
        }
    }
}

impl RunOptions {
    fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            jobs: self.jobs,
            fail_fast: self.fail_fast,
            timeout: self.timeout,
        }
    }
}

/// Outcome of a dry run
#[derive(Debug)]
pub struct Plan {
    pub changes: Vec<PlannedChange>,
    /// Statuses of the dry run; failures here are find or validation errors
    pub result: RunResult,
}

/// Compute the changes a run would make, without rendering anything
pub fn plan(build: BuildFn<'_>, context: ContextFn<'_>, opts: &RunOptions) -> Result<Plan> {
    let mut tasks = build()?;
    let ctx = context();
    let target = Target::DryRun(DryRunTarget::new());

    let result = execute(
        &mut tasks,
        &ctx,
        &target,
        &opts.execute_options(),
        &mut NoProgress,
    )
    .context("Failed to plan changes")?;

    let changes = target
        .as_dry_run()
        .map(DryRunTarget::changes)
        .unwrap_or_default();
    Ok(Plan { changes, result })
}

/// Plan, show the plan, confirm, then render against `target`
pub fn apply(
    build: BuildFn<'_>,
    context: ContextFn<'_>,
    target: &Target,
    opts: &RunOptions,
) -> Result<RunResult> {
    // 1. Dry run
    let plan = plan(build, context, opts)?;
    display_plan(&plan.changes);

    // Failed tasks only hold back their dependents; other changes still apply
    if !plan.result.is_success() {
        println!();
        ui::warn(&format!(
            "{} task(s) failed during planning; their dependents will be skipped",
            plan.result.summary.failed
        ));
        print_failures(&plan.result);
    }
    if plan.changes.is_empty() {
        return Ok(plan.result);
    }

    // 2. Confirm (unless --yes)
    if !opts.yes && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(aborted(&plan.changes));
    }

    // 3. Render
    println!();
    println!(
        "  {} Applying {} change(s) against the {} target...",
        "→".cyan(),
        plan.changes.len(),
        target.kind()
    );

    let mut tasks = build()?;
    let ctx = context();
    let mut progress = RunProgress::new(opts.quiet);
    let started = Instant::now();
    let result = execute(&mut tasks, &ctx, target, &opts.execute_options(), &mut progress)
        .context("Failed to apply changes")?;

    // 4. Summary
    print_summary(&result, started.elapsed());
    Ok(result)
}

/// Render into a Terraform configuration written under `out_dir`
pub fn terraform(
    build: BuildFn<'_>,
    context: ContextFn<'_>,
    provider: &str,
    region: &str,
    out_dir: &Path,
    opts: &RunOptions,
) -> Result<(RunResult, Option<PathBuf>)> {
    let mut tasks = build()?;
    let ctx = context();
    let target = Target::Terraform(TerraformTarget::new(provider, region));
    let mut progress = RunProgress::new(opts.quiet);
    let started = Instant::now();

    let result = execute(&mut tasks, &ctx, &target, &opts.execute_options(), &mut progress)
        .context("Failed to render Terraform configuration")?;
    print_summary(&result, started.elapsed());

    if !result.is_success() {
        return Ok((result, None));
    }

    let Some(terraform) = target.as_terraform() else {
        return Ok((result, None));
    };
    let path = terraform
        .write_to(out_dir)
        .with_context(|| format!("Failed to write Terraform configuration to {}", out_dir.display()))?;
    ui::success(&format!("Wrote {}", path.display()));
    Ok((result, Some(path)))
}

/// Statuses for a run the user declined
fn aborted(changes: &[PlannedChange]) -> RunResult {
    RunResult::from_reports(
        changes
            .iter()
            .map(|change| TaskReport {
                key: change.key.clone(),
                status: TaskStatus::Skipped {
                    reason: "aborted by user".to_string(),
                },
                elapsed: None,
            })
            .collect(),
    )
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

/// List failed tasks with their errors
pub fn print_failures(result: &RunResult) {
    for (key, error) in result.failures() {
        println!("    {} {}: {}", "✗".red(), key, error);
    }
}

/// Print final summary
pub fn print_summary(result: &RunResult, elapsed: Duration) {
    let summary = &result.summary;
    println!();
    if summary.is_success() {
        println!(
            "  {} Cluster reconciled in {}",
            "✓".green().bold(),
            ui::format_duration(elapsed)
        );
    } else {
        println!("  {} Reconciled with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} updated", summary.updated);
    }
    if summary.no_change > 0 {
        println!("    • {} unchanged", summary.no_change);
    }
    if summary.skipped > 0 {
        println!("    • {} skipped", summary.skipped);
        for report in &result.reports {
            if let TaskStatus::Skipped { reason } = &report.status {
                println!(
                    "      {} {} {}",
                    status_symbol(&report.status),
                    report.key,
                    format!("({reason})").dimmed()
                );
            }
        }
    }
    if summary.failed > 0 {
        println!("    • {} {}", summary.failed, "failed".red());
        print_failures(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NodeHost;
    use crate::tasks::File;
    use reconcile::{Lifecycle, LocalTarget, TaskKey};
    use std::sync::Arc;

    fn tasks() -> Result<TaskSet> {
        let mut tasks = TaskSet::new();
        tasks.add(File::new("/etc/kubeup/a.conf", "a\n", "0644"))?;
        tasks.add(File::new("/etc/kubeup/b.conf", "b\n", "0644"))?;
        Ok(tasks)
    }

    fn quiet() -> RunOptions {
        RunOptions {
            yes: true,
            quiet: true,
            ..RunOptions::default()
        }
    }

    #[test]
    fn test_plan_does_not_render() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let context = move || Context::new().with_cloud(Arc::new(NodeHost::staged(&root)));

        let plan = plan(&tasks, &context, &quiet()).unwrap();
        assert_eq!(plan.changes.len(), 2);
        assert!(plan.result.is_success());
        assert!(!dir.path().join("etc/kubeup/a.conf").exists());
    }

    #[test]
    fn test_apply_then_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let context = move || Context::new().with_cloud(Arc::new(NodeHost::staged(&root)));
        let target = Target::Local(LocalTarget::new(dir.path()));

        let result = apply(&tasks, &context, &target, &quiet()).unwrap();
        assert_eq!(result.summary.created, 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("etc/kubeup/b.conf")).unwrap(),
            "b\n"
        );

        let again = apply(&tasks, &context, &target, &quiet()).unwrap();
        assert_eq!(again.summary.no_change, 2);
        assert_eq!(again.summary.total_changes(), 0);
    }

    #[test]
    fn test_apply_keeps_independent_branch_after_planning_failure() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let context = move || Context::new().with_cloud(Arc::new(NodeHost::staged(&root)));
        let target = Target::Local(LocalTarget::new(dir.path()));
        let tasks = || -> Result<TaskSet> {
            let mut tasks = TaskSet::new();
            tasks.add(File::new("/etc/kubeup/independent.conf", "ok\n", "0644"))?;
            let mut prebuilt = File::new("/etc/kubeup/prebuilt.conf", "x\n", "0644");
            prebuilt.lifecycle = Lifecycle::ExistsAndValidates;
            tasks.add(prebuilt)?;
            Ok(tasks)
        };

        let result = apply(&tasks, &context, &target, &quiet()).unwrap();
        assert_eq!(result.summary.created, 1);
        assert_eq!(result.summary.failed, 1);
        assert!(!result.is_success());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("etc/kubeup/independent.conf")).unwrap(),
            "ok\n"
        );
        assert!(!dir.path().join("etc/kubeup/prebuilt.conf").exists());
    }

    #[test]
    fn test_planning_failure_without_changes_renders_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let context = move || Context::new().with_cloud(Arc::new(NodeHost::staged(&root)));
        let target = Target::Local(LocalTarget::new(dir.path()));
        let tasks = || -> Result<TaskSet> {
            let mut tasks = TaskSet::new();
            let mut prebuilt = File::new("/etc/kubeup/prebuilt.conf", "x\n", "0644");
            prebuilt.lifecycle = Lifecycle::ExistsAndValidates;
            tasks.add(prebuilt)?;
            Ok(tasks)
        };

        let result = apply(&tasks, &context, &target, &quiet()).unwrap();
        assert_eq!(result.summary.failed, 1);
        assert_eq!(result.summary.total_changes(), 0);
    }

    #[test]
    fn test_aborted_marks_planned_tasks_skipped() {
        let changes = vec![PlannedChange {
            key: TaskKey::new("File", "/etc/a"),
            action: reconcile::Action::Create,
            fields: Default::default(),
        }];
        let result = aborted(&changes);
        assert_eq!(result.summary.skipped, 1);
        assert!(result.is_success());
    }
}
