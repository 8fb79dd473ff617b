use std::time::Duration;
use thiserror::Error;

/// Structured error type for fetch operations.
///
/// Every variant maps to one user-facing outcome; see
/// [`FetchError::subcategory`] for the label used in logs and stats.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The tool could not be started (binary missing, not executable)
    #[error("failed to start yt-dlp: {0}")]
    Spawn(#[source] std::io::Error),

    /// Nonzero exit
    #[error("yt-dlp exited with code {}: {}", exit_label(.exit_code), stderr_summary(.stderr))]
    ToolFailed { exit_code: Option<i32>, stderr: String },

    /// Exit 0 but nothing with the job prefix in the scratch dir
    #[error("yt-dlp reported success but no output file for job {job_id}")]
    OutputMissing { job_id: String },

    /// Wall-clock limit hit, process killed
    #[error("yt-dlp timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Private, removed or login-walled content
    #[error("access denied: {reason}")]
    AccessDenied { reason: String },

    /// Probe output was not the JSON we expect
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Scratch directory / file system failures
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Returns subcategory for logs and stats
    pub fn subcategory(&self) -> &'static str {
        match self {
            FetchError::Spawn(_) => "spawn",
            FetchError::ToolFailed { .. } => "tool_failed",
            FetchError::OutputMissing { .. } => "output_missing",
            FetchError::Timeout(_) => "timeout",
            FetchError::AccessDenied { .. } => "access_denied",
            FetchError::InvalidMetadata(_) => "invalid_metadata",
            FetchError::Io(_) => "io",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, FetchError::AccessDenied { .. })
    }
}

fn exit_label(exit_code: &Option<i32>) -> String {
    exit_code.map_or_else(|| "signal".to_string(), |code| code.to_string())
}

/// Last meaningful stderr line, the one yt-dlp prefixes with `ERROR:` if present.
fn stderr_summary(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .find(|line| line.starts_with("ERROR"))
        .or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()))
        .unwrap_or("<no stderr>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_failed_display_uses_error_line() {
        let err = FetchError::ToolFailed {
            exit_code: Some(1),
            stderr: "WARNING: x\nERROR: Unsupported URL\n[debug] trailing".to_string(),
        };
        assert_eq!(err.to_string(), "yt-dlp exited with code 1: ERROR: Unsupported URL");
        assert_eq!(err.subcategory(), "tool_failed");
    }

    #[test]
    fn test_tool_failed_killed_by_signal() {
        let err = FetchError::ToolFailed {
            exit_code: None,
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "yt-dlp exited with code signal: <no stderr>");
    }

    #[test]
    fn test_predicates() {
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(FetchError::AccessDenied {
            reason: "private".into()
        }
        .is_access_denied());
        assert!(!FetchError::OutputMissing { job_id: "j".into() }.is_access_denied());
    }
}
