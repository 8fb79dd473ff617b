use thiserror::Error;

/// Centralized error types for the application
///
/// Errors that escape a single job (startup, CLI commands, handler plumbing)
/// are converted to this enum for consistent reporting. Job-level failures use
/// the narrower [`crate::download::error::FetchError`] and
/// [`crate::download::pipeline::JobError`] instead, because they never escape
/// the job boundary.
#[derive(Error, Debug)]
pub enum AppError {
    /// Telegram API errors
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Download/yt-dlp errors
    #[error("Download error: {0}")]
    Download(#[from] crate::download::error::FetchError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// JSON (metadata, cache snapshot) errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;
