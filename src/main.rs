mod cli;
mod cloud;
mod commands;
mod config;
mod engine;
mod host;
mod model;
mod paths;
mod pki;
mod progress;
mod systemd;
mod tasks;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct AppContext {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = AppContext {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    log::debug!("Starting kubeup (verbosity {})", ctx.verbose);
    let config = cli.config.as_deref();

    match cli.command {
        Command::Plan(args) => commands::cloudup::plan(&ctx, config, &args),
        Command::Apply(args) => commands::cloudup::apply(&ctx, config, &args),
        Command::Terraform(args) => commands::cloudup::terraform(&ctx, config, &args),
        Command::Nodeup(args) => commands::nodeup::run(&ctx, config, &args),
        Command::Graph(args) => commands::graph::run(config, &args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "kubeup", &mut io::stdout());
            Ok(())
        }
    }
}
