//! Bounded execution of platform tools.
//!
//! Every invocation runs under a deadline; an overrunning child is killed
//! and reported as a timeout, which the dispatcher maps to
//! `status = timeout` on the wire.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a finished tool run. `ok` mirrors the exit status; `combined`
/// carries stdout and stderr in order of arrival.
#[derive(Debug)]
pub struct ToolOutput {
    pub combined: String,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug)]
pub enum ToolError {
    /// The deadline elapsed; the child was killed.
    Timeout,
    /// The tool could not be started at all.
    Spawn(std::io::Error),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::Timeout => write!(f, "deadline exceeded"),
            ToolError::Spawn(err) => write!(f, "failed to start tool: {err}"),
        }
    }
}

impl std::error::Error for ToolError {}

/// Run `program args...` with a deadline, collecting combined output.
pub async fn run_tool(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<ToolOutput, ToolError> {
    debug!(program, ?args, timeout_ms = timeout.as_millis() as u64, "Running tool");

    let child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| ToolError::Timeout)?
        .map_err(ToolError::Spawn)?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    let ok = output.status.success();
    let error = if ok {
        None
    } else {
        Some(format!(
            "exit status {}",
            output.status.code().unwrap_or(-1)
        ))
    };

    Ok(ToolOutput {
        combined,
        ok,
        error,
    })
}

/// Handle to one device, addressed through the platform's `adb` tool.
#[derive(Clone)]
pub struct Adb {
    serial: String,
}

impl Adb {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// `adb -s <serial> shell args...`
    pub async fn shell(&self, args: &[&str], timeout: Duration) -> Result<ToolOutput, ToolError> {
        let mut full: Vec<&str> = vec!["-s", &self.serial, "shell"];
        full.extend_from_slice(args);
        run_tool("adb", &full, timeout).await
    }

    /// `adb -s <serial> args...` for non-shell subcommands (pull etc).
    pub async fn run(&self, args: &[&str], timeout: Duration) -> Result<ToolOutput, ToolError> {
        let mut full: Vec<&str> = vec!["-s", &self.serial];
        full.extend_from_slice(args);
        run_tool("adb", &full, timeout).await
    }
}
