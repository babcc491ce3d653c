//! Cloud commands: `plan`, `apply` and `terraform`

use super::finish;
use crate::AppContext;
use crate::cli::{RunArgs, TerraformArgs};
use crate::cloud::AwsCloud;
use crate::cloud::mock::{ENV_FAULTS, MockEc2};
use crate::config::ClusterConfig;
use crate::engine::{self, differ::display_plan, executor::print_failures};
use crate::model::{SshKeyBuilder, build_all};
use crate::paths;
use crate::ui;
use anyhow::Result;
use reconcile::{CloudTarget, Context, Target, TaskSet};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Cloud tasks implied by the cluster configuration
pub fn tasks(config: &ClusterConfig) -> Result<TaskSet> {
    build_all(&[&SshKeyBuilder { config }])
}

/// Where the cluster's cloud state is kept
fn state_path(config: &ClusterConfig) -> Result<PathBuf> {
    Ok(paths::state_dir()?
        .join(&config.cluster.name)
        .join("ec2.json"))
}

/// Session for the configured region
fn session(config: &ClusterConfig) -> Result<Arc<AwsCloud>> {
    let path = state_path(config)?;
    let mut ec2 = MockEc2::open(&path)?;
    if let Ok(faults) = env::var(ENV_FAULTS) {
        log::warn!("Injecting cloud faults: {}", faults);
        ec2 = ec2.with_faults(&faults);
    }
    Ok(Arc::new(AwsCloud::new(Box::new(ec2), &config.cluster.region)))
}

fn header(config: &ClusterConfig) {
    ui::header(&format!("Cluster {}", config.cluster.name));
    ui::kv("cloud", &config.cluster.cloud);
    ui::kv("region", &config.cluster.region);
}

pub fn plan(ctx: &AppContext, config_path: Option<&Path>, args: &RunArgs) -> Result<()> {
    let config = ClusterConfig::load(config_path)?;
    header(&config);
    let cloud = session(&config)?;

    let build = || tasks(&config);
    let context = || Context::new().with_cloud(cloud.clone());
    let plan = engine::plan(&build, &context, &args.options(ctx))?;

    display_plan(&plan.changes);
    print_failures(&plan.result);
    finish(&plan.result)
}

pub fn apply(ctx: &AppContext, config_path: Option<&Path>, args: &RunArgs) -> Result<()> {
    let config = ClusterConfig::load(config_path)?;
    header(&config);
    let cloud = session(&config)?;

    let build = || tasks(&config);
    let context = || Context::new().with_cloud(cloud.clone());
    let target = Target::Cloud(CloudTarget::new(cloud.clone()));
    let result = engine::apply(&build, &context, &target, &args.options(ctx))?;
    finish(&result)
}

pub fn terraform(ctx: &AppContext, config_path: Option<&Path>, args: &TerraformArgs) -> Result<()> {
    let config = ClusterConfig::load(config_path)?;
    header(&config);

    // Generated offline; nothing is looked up in the account
    let build = || tasks(&config);
    let context = || Context::new().with_check_existing(false);
    let (result, _) = engine::terraform(
        &build,
        &context,
        &config.cluster.cloud,
        &config.cluster.region,
        &args.out,
        &args.run.options(ctx),
    )?;
    finish(&result)
}
