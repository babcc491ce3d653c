//! `kubeup graph` - print the task dependency graph

use super::{cloudup, nodeup};
use crate::cli::GraphArgs;
use crate::config::ClusterConfig;
use crate::ui;
use anyhow::{Context, Result};
use colored::Colorize;
use reconcile::{TaskGraph, TaskSet};
use std::path::Path;

/// Layers of the graph as printable lines
fn render(graph: &TaskGraph) -> Vec<String> {
    let mut lines = Vec::new();
    for (depth, layer) in graph.layers().iter().enumerate() {
        lines.push(format!("Layer {depth}"));
        for key in layer {
            let deps = graph.dependencies(key);
            if deps.is_empty() {
                lines.push(format!("  {key}"));
            } else {
                let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
                lines.push(format!("  {key} ← {}", deps.join(", ")));
            }
        }
    }
    lines
}

pub fn run(config_path: Option<&Path>, args: &GraphArgs) -> Result<()> {
    let config = ClusterConfig::load(config_path)?;

    let tasks: TaskSet = if args.node {
        // Without an explicit choice the current machine decides
        let distribution = nodeup::resolve_distribution(args.distribution, &config, Path::new("/"))?;
        ui::header(&format!("Node tasks ({distribution})"));
        nodeup::tasks(&config, distribution)?
    } else {
        ui::header(&format!("Cloud tasks of {}", config.cluster.name));
        cloudup::tasks(&config)?
    };

    let graph = TaskGraph::build(&tasks).context("Invalid task graph")?;
    if graph.is_empty() {
        ui::dim("No tasks");
        return Ok(());
    }
    for line in render(&graph) {
        if line.starts_with("Layer") {
            println!("{}", line.bold());
        } else {
            println!("{line}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Distribution;

    #[test]
    fn test_render_flatcar_layers() {
        let config = ClusterConfig::parse("[cluster]\nname = \"demo\"\nregion = \"us-east-1\"\n").unwrap();
        let tasks = nodeup::tasks(&config, Distribution::Flatcar).unwrap();
        let lines = render(&TaskGraph::build(&tasks).unwrap());

        assert_eq!(lines[0], "Layer 0");
        assert!(lines.contains(&"Layer 1".to_string()));
        assert!(
            lines
                .iter()
                .any(|l| l.starts_with("  Service/kubelet.service ← File/"))
        );
    }
}
