//! Process execution utilities with timeout support
//!
//! Short-lived helper invocations (version checks, metadata probes) go
//! through [`run_with_timeout`] so a hung child cannot block a worker.
//! Long fetches stream their output and are handled by the fetcher itself.

use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("process timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Run an async Command with a timeout.
///
/// The child is killed when the timeout fires (`kill_on_drop`).
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, ProcessError> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(ProcessError::Spawn(e)),
        Err(_) => Err(ProcessError::Timeout(timeout)),
    }
}

/// Returns the last `max_lines` non-empty lines of a process stream, lossily decoded.
pub fn output_tail(bytes: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
