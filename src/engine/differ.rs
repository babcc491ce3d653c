//! Plan display - kubeup-specific UI

use colored::Colorize;
use reconcile::target::group_by_kind;
use reconcile::{Action, PlanSummary, PlannedChange};
use serde_json::Value;

/// Longest field value shown before truncation
const MAX_VALUE_WIDTH: usize = 60;

fn kind_title(kind: &str) -> &str {
    match kind {
        "SSHKey" => "SSH key pairs",
        "File" => "Files",
        "Package" => "Packages",
        "Service" => "Systemd units",
        other => other,
    }
}

/// One-line rendering of a field value
fn short_value(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let first_line = text.lines().next().unwrap_or_default();
    let multiline = text.lines().nth(1).is_some();

    if first_line.chars().count() > MAX_VALUE_WIDTH {
        let cut: String = first_line.chars().take(MAX_VALUE_WIDTH - 1).collect();
        format!("{cut}…")
    } else if multiline {
        format!("{first_line} …")
    } else {
        first_line.to_string()
    }
}

/// Display planned changes grouped by task kind
pub fn display_plan(changes: &[PlannedChange]) {
    if changes.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    let groups = group_by_kind(changes);
    let mut kinds: Vec<_> = groups.keys().copied().collect();
    kinds.sort_unstable();

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Planned Changes".bold()
    );
    println!("│");

    for kind in kinds {
        println!("│ {}", kind_title(kind).bold());
        for change in &groups[kind] {
            let symbol = match change.action {
                Action::Create => "+".green(),
                Action::Update => "~".yellow(),
            };
            println!("│   {} {}", symbol, change.key.name);
            for (field, value) in &change.fields {
                println!("│       {:<16} {}", field, short_value(value).dimmed());
            }
        }
        println!("│");
    }

    let summary = PlanSummary::from_changes(changes);
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes ({} to create, {} to update)",
        summary.total().to_string().bold(),
        summary.creates.to_string().green(),
        summary.updates.to_string().yellow()
    );
    println!("└─────────────────────────────────────────────────────┘");
}
