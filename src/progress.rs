//! Progress indicators for kubeup runs.

use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{ProgressCallback, TaskKey, TaskStatus};

/// Progress bar driven by the reconcile scheduler
pub struct RunProgress {
    bar: Option<ProgressBar>,
    hidden: bool,
}

impl RunProgress {
    /// Bar drawn on stderr; `hidden` suppresses all drawing
    pub fn new(hidden: bool) -> Self {
        Self { bar: None, hidden }
    }
}

fn style() -> ProgressStyle {
    ProgressStyle::with_template("  {spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Symbol shown next to a finished task
pub fn status_symbol(status: &TaskStatus) -> &'static str {
    match status {
        TaskStatus::Created | TaskStatus::Updated => "✓",
        TaskStatus::NoChange => "○",
        TaskStatus::Skipped { .. } => "⊘",
        TaskStatus::Failed { .. } => "✗",
    }
}

impl ProgressCallback for RunProgress {
    fn on_run_start(&mut self, total: usize) {
        let bar = if self.hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        bar.set_style(style());
        self.bar = Some(bar);
    }

    fn on_task_start(&mut self, key: &TaskKey) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("→ {key}"));
        }
    }

    fn on_task_complete(&mut self, key: &TaskKey, status: &TaskStatus) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{} {}", status_symbol(status), key));
            bar.inc(1);
        }
    }

    fn on_run_complete(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_bar_counts_tasks() {
        let mut progress = RunProgress::new(true);
        progress.on_run_start(2);
        let key = TaskKey::new("File", "/etc/a");
        progress.on_task_start(&key);
        progress.on_task_complete(&key, &TaskStatus::Created);
        assert_eq!(progress.bar.as_ref().map(ProgressBar::position), Some(1));
        progress.on_run_complete();
        assert!(progress.bar.is_none());
    }

    #[test]
    fn test_status_symbols() {
        assert_eq!(status_symbol(&TaskStatus::NoChange), "○");
        assert_eq!(
            status_symbol(&TaskStatus::Skipped {
                reason: "x".into()
            }),
            "⊘"
        );
    }
}
