//! Preflights: checks run on the board before any output.
//!
//! Only the DRC is available. It is enabled with `preflight.run_drc` and
//! skipped with `--skip-pre`.

mod drc;

pub use drc::{drc_report_path, run_drc, KIAUTO_DRC_VERSION};

use crate::config::Config;
use crate::context::RunContext;
use crate::error::Error;

/// Names of the enabled preflights, for `--list`.
#[must_use]
pub fn enabled(config: &Config) -> Vec<&'static str> {
    let mut names = Vec::new();
    if config.preflight.run_drc {
        names.push("run_drc");
    }
    names
}

/// Runs every enabled preflight.
///
/// # Errors
///
/// Returns the first failure, see [`run_drc`].
pub fn run_preflights(ctx: &mut RunContext, config: &Config) -> Result<(), Error> {
    if let Some(options) = config.drc_options() {
        run_drc(ctx, &options)?;
    }
    Ok(())
}
