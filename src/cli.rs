use crate::model::Distribution;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubeup")]
#[command(version)]
#[command(about = "Provision and reconcile Kubernetes cluster infrastructure", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Cluster config file (default: ~/.config/kubeup/cluster.toml)
    #[arg(short, long, global = true, env = "KUBEUP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change in the cloud
    Plan(RunArgs),

    /// Create or update cloud objects
    Apply(RunArgs),

    /// Generate a Terraform configuration instead of calling the cloud
    Terraform(TerraformArgs),

    /// Bootstrap the local node: files, packages and systemd units
    Nodeup(NodeupArgs),

    /// Show the task dependency graph
    Graph(GraphArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared run options
// ============================================================================

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of parallel jobs
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Stop starting new tasks after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Stop starting new tasks after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

// ============================================================================
// Terraform
// ============================================================================

#[derive(Args)]
pub struct TerraformArgs {
    /// Output directory for kubernetes.tf.json and data files
    #[arg(short, long, default_value = "out/terraform")]
    pub out: PathBuf,

    #[command(flatten)]
    pub run: RunArgs,
}

// ============================================================================
// Nodeup
// ============================================================================

#[derive(Args)]
pub struct NodeupArgs {
    /// Root of the node filesystem; anything but "/" is a staging directory
    #[arg(long, default_value = "/")]
    pub root: PathBuf,

    /// Node distribution (ubuntu, debian, flatcar, containeros)
    #[arg(long)]
    pub distribution: Option<Distribution>,

    /// Only show what would change
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

// ============================================================================
// Graph
// ============================================================================

#[derive(Args)]
pub struct GraphArgs {
    /// Show node tasks instead of cloud tasks
    #[arg(long)]
    pub node: bool,

    /// Node distribution, with --node
    #[arg(long, requires = "node")]
    pub distribution: Option<Distribution>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_nodeup() {
        let cli = Cli::parse_from([
            "kubeup",
            "-vv",
            "nodeup",
            "--root",
            "/tmp/stage",
            "--distribution",
            "flatcar",
            "--yes",
            "--jobs",
            "2",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Nodeup(args) = cli.command else {
            panic!("expected nodeup");
        };
        assert_eq!(args.root, PathBuf::from("/tmp/stage"));
        assert_eq!(args.distribution, Some(Distribution::Flatcar));
        assert!(args.run.yes);
        assert_eq!(args.run.jobs, 2);
    }

    #[test]
    fn test_parse_apply_options() {
        let cli = Cli::parse_from(["kubeup", "apply", "--fail-fast", "--timeout", "30"]);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert!(args.fail_fast);
        assert_eq!(args.timeout, Some(30));
        assert!(!args.yes);
    }
}
