//! Progress reporting for one fetch.
//!
//! [`ProgressParser`] turns yt-dlp stdout, delivered in arbitrary chunks,
//! into [`ProgressEvent`]s. It is the only place that knows the tool's text
//! format. [`ProgressTracker`] decides which events are worth showing, and
//! [`DownloadStatus`] renders the status message.

use lazy_regex::regex;
use std::time::Duration;
use tokio::time::Instant;

use crate::core::escape_markdown_v2 as escape_markdown;
use crate::core::utils::truncate_chars;

/// One structured progress reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// 0.0..=100.0
    pub percent: f64,
    /// Display string as printed by the tool, e.g. "2.50MiB/s"
    pub speed: Option<String>,
    /// Display string as printed by the tool, e.g. "00:45"
    pub eta: Option<String>,
}

impl ProgressEvent {
    pub fn new(percent: f64) -> Self {
        Self {
            percent,
            speed: None,
            eta: None,
        }
    }
}

/// Incremental line parser for progress output.
///
/// Chunks may split lines anywhere; `\n` and `\r` both terminate a line.
#[derive(Debug, Default)]
pub struct ProgressParser {
    pending: String,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a chunk and returns the events of every line it completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        for c in chunk.chars() {
            if c == '\n' || c == '\r' {
                if !self.pending.is_empty() {
                    events.extend(parse_line(&self.pending));
                    self.pending.clear();
                }
            } else {
                self.pending.push(c);
            }
        }
        events
    }

    /// Flushes a trailing line that never got its terminator.
    pub fn finish(&mut self) -> Option<ProgressEvent> {
        let line = std::mem::take(&mut self.pending);
        parse_line(&line)
    }
}

/// Parses one complete line. Lines without a percentage yield nothing.
pub fn parse_line(line: &str) -> Option<ProgressEvent> {
    let percent_caps = regex!(r"(\d{1,3}(?:\.\d+)?)%").captures(line)?;
    let percent: f64 = percent_caps.get(1)?.as_str().parse().ok()?;
    if !(0.0..=100.0).contains(&percent) {
        return None;
    }

    let known = |value: &str| !value.eq_ignore_ascii_case("unknown") && value != "N/A";

    let speed = regex!(r"\bat\s+(\S+)")
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| known(s));

    let eta = regex!(r"\bETA\s+(\S+)")
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| known(s));

    Some(ProgressEvent { percent, speed, eta })
}

/// Per-job display state: drops regressions and throttles updates.
///
/// The first event and the first 100% reading are always shown.
#[derive(Debug)]
pub struct ProgressTracker {
    displayed: Option<f64>,
    highest: f64,
    last_emitted_at: Option<Instant>,
    min_interval: Duration,
}

impl ProgressTracker {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            displayed: None,
            highest: 0.0,
            last_emitted_at: None,
            min_interval,
        }
    }

    /// Last percentage handed out for display.
    pub fn displayed(&self) -> Option<f64> {
        self.displayed
    }

    /// Returns the event if it should be shown now.
    pub fn accept(&mut self, event: ProgressEvent, now: Instant) -> Option<ProgressEvent> {
        if event.percent < self.highest {
            return None;
        }
        self.highest = event.percent;

        if let Some(shown) = self.displayed {
            if event.percent <= shown {
                return None;
            }
        }

        let completed = event.percent >= 100.0;
        if let Some(last) = self.last_emitted_at {
            if !completed && now.saturating_duration_since(last) < self.min_interval {
                return None;
            }
        }

        self.displayed = Some(event.percent);
        self.last_emitted_at = Some(now);
        Some(event)
    }
}

/// Classic ten-cell bar, e.g. `[████░░░░░░]` for 40%.
pub fn progress_bar(percent: f64) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 10.0).floor()) as usize;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(10 - filled))
}

/// One plain-text progress line for the terminal, e.g.
/// `[████░░░░░░]  42.0% 2.50MiB/s ETA 00:45`.
pub fn terminal_line(event: &ProgressEvent) -> String {
    let mut line = format!("{} {:5.1}%", progress_bar(event.percent), event.percent);
    if let Some(speed) = &event.speed {
        line.push(' ');
        line.push_str(speed);
    }
    if let Some(eta) = &event.eta {
        line.push_str(" ETA ");
        line.push_str(eta);
    }
    line
}

/// Status message states of one job, rendered as MarkdownV2.
#[derive(Debug, Clone)]
pub enum DownloadStatus {
    /// Waiting for a worker slot
    Queued { position: usize },
    /// Slot acquired, probing
    Starting { platform: &'static str },
    Downloading {
        platform: &'static str,
        title: String,
        progress: ProgressEvent,
    },
    Uploading { platform: &'static str, title: String },
}

impl DownloadStatus {
    pub fn render(&self) -> String {
        match self {
            DownloadStatus::Queued { position } => {
                format!("📥 In queue, position *{}*", position)
            }
            DownloadStatus::Starting { platform } => {
                format!("⏳ Processing \\({}\\)\\.\\.\\.", escape_markdown(platform))
            }
            DownloadStatus::Downloading {
                platform,
                title,
                progress,
            } => {
                let mut text = format!(
                    "⬇️ *{}*\n{}\n{} {}%",
                    escape_markdown(platform),
                    escape_markdown(&truncate_chars(title, 80)),
                    progress_bar(progress.percent),
                    escape_markdown(&format!("{:.1}", progress.percent)),
                );
                if let Some(speed) = &progress.speed {
                    text.push_str(&format!("\n🚀 {}", escape_markdown(speed)));
                }
                if let Some(eta) = &progress.eta {
                    text.push_str(&format!("\n⏱ ETA {}", escape_markdown(eta)));
                }
                text
            }
            DownloadStatus::Uploading { platform, title } => format!(
                "📤 Sending *{}*\n{}",
                escape_markdown(platform),
                escape_markdown(&truncate_chars(title, 80))
            ),
        }
    }
}
