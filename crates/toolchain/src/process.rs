//! Subprocess invocation with wall-clock timeouts.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::errors::{ToolError, ToolResult};

/// Captured output of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a tool with arguments, killing it when the timeout expires.
pub async fn run_with_timeout(
    tool: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> ToolResult<CommandOutput> {
    let mut command = Command::new(tool);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    tracing::debug!(tool, ?args, "Running toolchain command");

    let child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ToolError::NotInstalled {
                tool: tool.to_string(),
            }
        } else {
            ToolError::Io(e)
        }
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ToolError::Timeout {
            tool: tool.to_string(),
            seconds: timeout.as_secs(),
        })??;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Report a tool's version line, for the diagnostic bundle.
pub async fn tool_version(tool: &str) -> Option<String> {
    let output = run_with_timeout(tool, &["--version"], None, Duration::from_secs(5))
        .await
        .ok()?;
    if !output.success() {
        return None;
    }
    output.stdout.lines().next().map(|line| line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tool_classified() {
        let err = run_with_timeout(
            "definitely-not-a-real-tool-xyz",
            &[],
            None,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::NotInstalled { .. }));
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let output = run_with_timeout("sh", &["-c", "echo out; echo err >&2; exit 3"], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let err = run_with_timeout("sleep", &["5"], None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }
}
