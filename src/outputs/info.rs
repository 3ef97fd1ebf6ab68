//! `info`: records the environment of the run.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Deserialize;

use super::Output;
use crate::context::RunContext;
use crate::error::Error;
use crate::tools::ToolStatus;

/// Options of an `info` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfoOptions {
    /// File name pattern (`%i=info`, `%x=txt`), the global one when missing.
    #[serde(default)]
    pub output: Option<String>,
}

pub(super) fn targets(output: &Output, options: &InfoOptions, ctx: &RunContext) -> Vec<PathBuf> {
    let expander = ctx.expander(output.selection.variant());
    let pattern = options.output.as_deref().unwrap_or(&ctx.global().output);
    vec![output.target(ctx, &expander, pattern, "info", "txt")]
}

fn report(ctx: &RunContext, tools: &[ToolStatus]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "kiprint {}", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(text, "Platform: {} {}", std::env::consts::OS, std::env::consts::ARCH);
    let _ = writeln!(text, "Board: {}", ctx.board.path.display());
    if let Some(pcb) = ctx.board.pcb_path() {
        let _ = writeln!(text, "PCB file: {}", pcb.display());
    }
    text.push_str("\nTools:\n");
    for status in tools {
        let found = match (&status.path, status.version) {
            (Some(path), Some(version)) => format!("{version} at {}", path.display()),
            (Some(path), None) => format!("unknown version at {}", path.display()),
            (None, _) => "not found".to_string(),
        };
        let _ = writeln!(text, "- {} ({}): {found}", status.tool.name, status.tool.command);
    }
    text
}

pub(super) fn run(output: &Output, options: &InfoOptions, ctx: &mut RunContext) -> Result<(), Error> {
    let target = targets(output, options, ctx).remove(0);
    let tools = ctx.tools.status();
    let missing = tools.iter().filter(|t| t.path.is_none()).count();
    tracing::debug!(tools = tools.len(), missing, "Checked tools");
    let text = report(ctx, &tools);
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    std::fs::write(&target, text).map_err(|e| Error::io(&target, e))?;
    tracing::info!(file = %target.display(), "Created");
    Ok(())
}
