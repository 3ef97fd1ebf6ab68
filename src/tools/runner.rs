//! Running external commands with captured output.

use std::process::{Command, ExitStatus};

use super::ToolError;

/// Attempts made by [`exec_with_retry`] unless configured otherwise.
pub const DEFAULT_RETRIES: u32 = 3;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

fn spawn(tool: &str, cmd: &mut Command) -> Result<(i32, CommandOutput), ToolError> {
    tracing::debug!(tool, command = %describe(cmd), "Executing");
    let output = cmd.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ToolError::Missing {
                tool: tool.to_string(),
            }
        } else {
            ToolError::Spawn {
                tool: tool.to_string(),
                source: e,
            }
        }
    })?;
    let captured = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    for line in captured.stdout.lines().chain(captured.stderr.lines()) {
        if !line.trim().is_empty() {
            tracing::debug!(tool, "- {line}");
        }
    }
    Ok((exit_code(output.status), captured))
}

/// Runs a command and captures its output. Output only reaches the debug log.
///
/// # Errors
///
/// Returns [`ToolError::Missing`] when the program doesn't exist and
/// [`ToolError::Failed`] for a non zero exit code.
pub fn run(tool: &str, cmd: &mut Command) -> Result<CommandOutput, ToolError> {
    let (code, output) = spawn(tool, cmd)?;
    if code != 0 {
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            code,
            output: format!("{}{}", output.stderr, output.stdout),
        });
    }
    Ok(output)
}

/// Runs a command, retrying while it fails with a code in `1..=127`.
///
/// KiAuto tools drive a GUI and fail randomly; codes above 127 carry
/// meaning (e.g. the DRC error count) and are returned at once.
///
/// # Errors
///
/// Returns an error only when the program can't be started; the final exit
/// code is returned otherwise.
pub fn exec_with_retry(tool: &str, mut build: impl FnMut() -> Command, attempts: u32) -> Result<i32, ToolError> {
    let attempts = attempts.max(1);
    let mut code = 0;
    for attempt in 1..=attempts {
        let mut cmd = build();
        (code, _) = spawn(tool, &mut cmd)?;
        if !(1..=127).contains(&code) {
            break;
        }
        if attempt < attempts {
            tracing::warn!(tool, code, attempt, "Failed, retrying");
        }
    }
    Ok(code)
}
