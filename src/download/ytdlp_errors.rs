/// yt-dlp failure classification
///
/// The tool only reports failures as free text on stderr. Classification is
/// kept in this one place so the executor can turn "private / removed /
/// login required" into an access-denied outcome and log everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YtDlpErrorKind {
    /// Login or cookies required (includes expired cookies)
    AuthRequired,
    /// Private post/video
    Private,
    /// Removed, never existed, or blocked in our region
    Unavailable,
    /// Site detected automation (HTTP 403, signature issues)
    BotDetection,
    /// Timeouts, resets, DNS
    Network,
    Unknown,
}

impl YtDlpErrorKind {
    /// Whether the resource itself is inaccessible, as opposed to a transient or tool problem.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            YtDlpErrorKind::AuthRequired | YtDlpErrorKind::Private | YtDlpErrorKind::Unavailable
        )
    }
}

/// Classifies a yt-dlp failure from its stderr
pub fn analyze_ytdlp_error(stderr: &str) -> YtDlpErrorKind {
    let stderr_lower = stderr.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| stderr_lower.contains(n));

    if has(&[
        "private video",
        "video is private",
        "this account is private",
        "private account",
        "is only available for registered users",
    ]) {
        return YtDlpErrorKind::Private;
    }

    if has(&[
        "sign in to confirm your age",
        "login required",
        "requested content is not available, rate-limit reached or login required",
        "cookies are no longer valid",
        "use --cookies",
        "please log in",
        "you need to log in",
    ]) {
        return YtDlpErrorKind::AuthRequired;
    }

    if has(&[
        "video unavailable",
        "this video is not available",
        "video is not available",
        "has been removed",
        "does not exist",
        "http error 404",
        "not available in your country",
        "geo restriction",
        "no video could be found",
    ]) {
        return YtDlpErrorKind::Unavailable;
    }

    if has(&[
        "sign in to confirm you're not a bot",
        "http error 403",
        "signature extraction failed",
        "unable to extract",
    ]) {
        return YtDlpErrorKind::BotDetection;
    }

    if has(&[
        "timed out",
        "timeout",
        "connection reset",
        "connection refused",
        "network is unreachable",
        "name or service not known",
        "temporary failure in name resolution",
    ]) {
        return YtDlpErrorKind::Network;
    }

    YtDlpErrorKind::Unknown
}

/// Short operator hint logged next to a failure.
pub fn fix_hint(kind: YtDlpErrorKind) -> &'static str {
    match kind {
        YtDlpErrorKind::AuthRequired => "refresh YTDL_COOKIES_FILE with a logged-in export",
        YtDlpErrorKind::BotDetection => "update yt-dlp (`yt-dlp -U`) or rotate cookies",
        YtDlpErrorKind::Network => "check connectivity of the host",
        YtDlpErrorKind::Private | YtDlpErrorKind::Unavailable => "nothing to fix, content is not accessible",
        YtDlpErrorKind::Unknown => "inspect stderr in the log file",
    }
}
