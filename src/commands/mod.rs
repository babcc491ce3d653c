// Cloud side: key pairs and other cloud objects
pub mod cloudup;

// Node side: files, packages and units
pub mod nodeup;

// Inspection
pub mod graph;

use crate::AppContext;
use crate::cli::RunArgs;
use crate::engine::RunOptions;
use anyhow::{Result, bail};
use reconcile::RunResult;
use std::time::Duration;

impl RunArgs {
    pub fn options(&self, ctx: &AppContext) -> RunOptions {
        RunOptions {
            jobs: self.jobs,
            fail_fast: self.fail_fast,
            timeout: self.timeout.map(Duration::from_secs),
            yes: self.yes,
            quiet: ctx.quiet,
        }
    }
}

/// Turn failed tasks into a non-zero exit
fn finish(result: &RunResult) -> Result<()> {
    let failed = result.summary.failed;
    if failed > 0 {
        bail!("{} task(s) failed", failed);
    }
    Ok(())
}
