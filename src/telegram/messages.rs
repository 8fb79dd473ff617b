//! User-facing texts, MarkdownV2 escaped.

use indoc::formatdoc;
use std::time::Duration;

use crate::core::utils::{escape_markdown_v2, format_duration, format_file_size};
use crate::download::error::FetchError;
use crate::download::pipeline::JobError;
use crate::download::platform::Platform;
use crate::download::queue::EnqueueError;

pub fn start_text() -> String {
    formatdoc! {"
        👋 Hi\\! Send me a link and I will fetch the media for you\\.

        {help}",
        help = help_text()
    }
}

pub fn help_text() -> String {
    let platforms = escape_markdown_v2(&Platform::supported_labels().join(", "));
    formatdoc! {"
        *How to use*
        • send a link to get the video
        • /audio `link` to get only the audio
        • /video `link` to get the video explicitly
        • /stats shows bot statistics

        Supported: {platforms}"
    }
}

pub fn invalid_url_text() -> String {
    "🤔 That does not look like a link\\. Send an `http` or `https` URL\\.".to_string()
}

pub fn rate_limited_text(retry_after: Duration) -> String {
    format!(
        "⏳ Too many requests\\. Try again in {}\\.",
        escape_markdown_v2(&format_duration(retry_after.as_secs().max(1)))
    )
}

pub fn enqueue_error_text(err: &EnqueueError) -> String {
    match err {
        EnqueueError::QueueFull { .. } => "🚦 The queue is full right now\\. Please try again later\\.".to_string(),
        EnqueueError::Duplicate => "🔁 This link is already being processed for this chat\\.".to_string(),
    }
}

/// Reply for a request that took a free worker slot right away.
pub fn job_started_text() -> String {
    "🚀 Got it, fetching right away\\.".to_string()
}

pub fn stats_denied_text() -> String {
    "🔒 Statistics are available to administrators only\\.".to_string()
}

/// One failure notice per failed job, chosen by cause.
pub fn failure_text(err: &JobError) -> String {
    match err {
        JobError::Fetch(FetchError::Timeout(limit)) => format!(
            "⌛ The download took longer than {} and was stopped\\.",
            escape_markdown_v2(&format_duration(limit.as_secs()))
        ),
        JobError::Fetch(FetchError::AccessDenied { reason }) => format!(
            "🔒 This media is not accessible: {}",
            escape_markdown_v2(reason)
        ),
        JobError::TooLarge {
            size_bytes,
            limit_bytes,
        } => format!(
            "📦 The file is too large to send \\({}, limit {}\\)\\.",
            escape_markdown_v2(&format_file_size(*size_bytes)),
            escape_markdown_v2(&format_file_size(*limit_bytes))
        ),
        _ => generic_failure_text(),
    }
}

pub fn generic_failure_text() -> String {
    "❌ Could not fetch this link\\. Please try again later\\.".to_string()
}
