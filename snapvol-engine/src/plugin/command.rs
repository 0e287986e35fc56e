//! External command execution for CLI-driven backends.

use std::process::Output;

use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{Result, SnapshotError};

/// Outcome of a removal command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    Removed,
    AlreadyAbsent,
}

/// Spawn a command and wait for it. Failing to start it is a `BackendFailure`.
async fn execute(program: &str, args: &[&str]) -> Result<Output> {
    debug!(command = %program, args = ?args, "Executing command");

    Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| SnapshotError::BackendFailure(format!("Failed to execute {}: {}", program, e)))
}

fn exit_failure(program: &str, output: &Output) -> SnapshotError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    error!(command = %program, status = ?output.status.code(), stderr = %stderr, "Command failed");
    SnapshotError::BackendFailure(format!(
        "{} failed ({}): {}",
        program,
        output.status,
        stderr.trim()
    ))
}

/// Run a command to completion and return its stdout.
///
/// A non-zero exit status is a `BackendFailure` carrying stderr.
pub(crate) async fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = execute(program, args).await?;

    if !output.status.success() {
        return Err(exit_failure(program, &output));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Run a removal command.
///
/// `is_absent` is only consulted for a command that started and exited
/// non-zero, and only sees its stderr.
pub(crate) async fn run_removal<F>(program: &str, args: &[&str], is_absent: F) -> Result<Removal>
where
    F: Fn(&str) -> bool,
{
    let output = execute(program, args).await?;

    if output.status.success() {
        return Ok(Removal::Removed);
    }

    if is_absent(&String::from_utf8_lossy(&output.stderr)) {
        debug!(command = %program, "Removal target already absent");
        return Ok(Removal::AlreadyAbsent);
    }

    Err(exit_failure(program, &output))
}
