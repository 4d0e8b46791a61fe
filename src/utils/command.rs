//! Command execution primitives with consistent error handling.

use std::process::{Command, Output};

use crate::core::error::{Error, Result};

/// Run a command and return stdout on success.
///
/// Returns trimmed stdout if the command succeeds.
/// Returns an error with stderr (or stdout fallback) if it fails.
pub fn run(program: &str, args: &[&str], context: &str) -> Result<String> {
    let output = Command::new(program).args(args).output().map_err(|e| {
        Error::internal_io(
            format!("Failed to run {}: {}", context, e),
            Some(context.to_string()),
        )
    })?;

    if !output.status.success() {
        return Err(Error::internal_io(
            format!("{} failed: {}", context, error_text(&output)),
            Some(context.to_string()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a command with inherited stdio and return its exit code.
///
/// Used for long-running subprocesses (rsync, ssh, trainer) whose output
/// should stream to the operator rather than be captured.
pub fn run_status(program: &str, args: &[&str], context: &str) -> Result<i32> {
    let status = Command::new(program).args(args).status().map_err(|e| {
        Error::internal_io(
            format!("Failed to run {}: {}", context, e),
            Some(context.to_string()),
        )
    })?;

    // A None exit code means the child was killed by a signal.
    status.code().ok_or_else(|| {
        Error::internal_io(
            format!("{} terminated by signal", context),
            Some(context.to_string()),
        )
    })
}

/// Extract error text from command output.
///
/// Prefers stderr, falls back to stdout if stderr is empty.
pub fn error_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_succeeds_with_valid_command() {
        let result = run("echo", &["hello"], "echo test");
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "hello");
    }

    #[test]
    fn run_fails_with_invalid_command() {
        let result = run("nonexistent_command_xyz", &[], "test");
        assert!(result.is_err());
    }

    #[test]
    fn run_status_reports_exit_code() {
        assert_eq!(run_status("true", &[], "true test").unwrap(), 0);
        assert_ne!(run_status("false", &[], "false test").unwrap(), 0);
    }
}
