//! `kubeup nodeup` - converge the local node

use super::finish;
use crate::AppContext;
use crate::cli::NodeupArgs;
use crate::config::ClusterConfig;
use crate::engine::{self, differ::display_plan, executor::print_failures};
use crate::host::NodeHost;
use crate::model::{Distribution, KubeletBuilder, LogrotateBuilder, build_all};
use crate::ui;
use anyhow::Result;
use reconcile::{Context, LocalTarget, Target, TaskSet};
use std::path::Path;
use std::sync::Arc;

/// Node tasks for a distribution
pub fn tasks(config: &ClusterConfig, distribution: Distribution) -> Result<TaskSet> {
    build_all(&[
        &LogrotateBuilder {
            config,
            distribution,
        },
        &KubeletBuilder {
            config,
            distribution,
        },
    ])
}

/// Command line, then config, then the node's os-release
pub fn resolve_distribution(
    requested: Option<Distribution>,
    config: &ClusterConfig,
    root: &Path,
) -> Result<Distribution> {
    if let Some(distribution) = requested.or(config.node.distribution) {
        return Ok(distribution);
    }
    let detected = Distribution::detect(root)?;
    log::info!("Detected distribution {}", detected);
    Ok(detected)
}

fn host(root: &Path) -> NodeHost {
    if root == Path::new("/") {
        NodeHost::system()
    } else {
        log::debug!("Staging node state under {}", root.display());
        NodeHost::staged(root)
    }
}

pub fn run(ctx: &AppContext, config_path: Option<&Path>, args: &NodeupArgs) -> Result<()> {
    let config = ClusterConfig::load(config_path)?;
    let distribution = resolve_distribution(args.distribution, &config, &args.root)?;

    ui::header(&format!("Node of {}", config.cluster.name));
    ui::kv("distribution", distribution.as_str());
    ui::kv("root", &args.root.display().to_string());

    let host = Arc::new(host(&args.root));
    let build = || tasks(&config, distribution);
    let context = || Context::new().with_cloud(host.clone());
    let opts = args.run.options(ctx);

    if args.dry_run {
        let plan = engine::plan(&build, &context, &opts)?;
        display_plan(&plan.changes);
        print_failures(&plan.result);
        return finish(&plan.result);
    }

    let target = Target::Local(LocalTarget::new(&args.root));
    let result = engine::apply(&build, &context, &target, &opts)?;
    finish(&result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config(extra: &str) -> ClusterConfig {
        ClusterConfig::parse(&format!(
            "[cluster]\nname = \"demo\"\nregion = \"us-east-1\"\n{extra}"
        ))
        .unwrap()
    }

    #[test]
    fn test_distribution_precedence() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/os-release"), "ID=debian\n").unwrap();

        let plain = config("");
        assert_eq!(
            resolve_distribution(None, &plain, dir.path()).unwrap(),
            Distribution::Debian
        );

        let flatcar = config("[node]\ndistribution = \"flatcar\"\n");
        assert_eq!(
            resolve_distribution(None, &flatcar, dir.path()).unwrap(),
            Distribution::Flatcar
        );
        assert_eq!(
            resolve_distribution(Some(Distribution::Ubuntu), &flatcar, dir.path()).unwrap(),
            Distribution::Ubuntu
        );
    }

    #[test]
    fn test_node_tasks_form_a_graph() {
        let tasks = tasks(&config(""), Distribution::Ubuntu).unwrap();
        let graph = reconcile::TaskGraph::build(&tasks).unwrap();
        assert_eq!(graph.len(), tasks.len());
    }
}
