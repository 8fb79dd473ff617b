//! Usage counters behind the /stats command.
//!
//! Counters are plain atomics; gauges (queue, caches) are read from their
//! owners when a report is rendered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::core::escape_markdown_v2;
use crate::core::utils::format_duration;
use crate::download::error::FetchError;
use crate::download::queue::QueueStatus;
use crate::storage::cache::CacheStats;

/// Terminal state of one job, as counted by [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Delivered { from_cache: bool },
    Failed,
    TimedOut,
    AccessDenied,
}

impl JobOutcome {
    pub fn from_fetch_error(err: &FetchError) -> Self {
        match err {
            FetchError::Timeout(_) => JobOutcome::TimedOut,
            FetchError::AccessDenied { .. } => JobOutcome::AccessDenied,
            _ => JobOutcome::Failed,
        }
    }
}

#[derive(Debug)]
pub struct Stats {
    started_at: Instant,
    total_requests: AtomicU64,
    rejected_requests: AtomicU64,
    succeeded: AtomicU64,
    served_from_cache: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    access_denied: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub succeeded: u64,
    pub served_from_cache: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub access_denied: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            served_from_cache: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            access_denied: AtomicU64::new(0),
        }
    }

    /// Every inbound fetch request, admitted or not.
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Rate limited or refused by the queue.
    pub fn record_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: JobOutcome) {
        let counter = match outcome {
            JobOutcome::Delivered { from_cache } => {
                if from_cache {
                    self.served_from_cache.fetch_add(1, Ordering::Relaxed);
                }
                &self.succeeded
            }
            JobOutcome::Failed => &self.failed,
            JobOutcome::TimedOut => &self.timeouts,
            JobOutcome::AccessDenied => &self.access_denied,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            served_from_cache: self.served_from_cache.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            access_denied: self.access_denied.load(Ordering::Relaxed),
        }
    }
}

/// Renders the /stats report in MarkdownV2.
pub fn render_report(snapshot: &StatsSnapshot, queue: &QueueStatus, caches: &[CacheStats]) -> String {
    let mut lines = vec![
        "📊 *Statistics*".to_string(),
        String::new(),
        format!("⏱ Uptime: {}", escape_markdown_v2(&format_duration(snapshot.uptime.as_secs()))),
        format!("📥 Requests: {}", snapshot.total_requests),
        format!("🚫 Rejected: {}", snapshot.rejected_requests),
        format!(
            "✅ Delivered: {} \\({} from cache\\)",
            snapshot.succeeded, snapshot.served_from_cache
        ),
        format!("❌ Failed: {}", snapshot.failed),
        format!("⌛ Timeouts: {}", snapshot.timeouts),
        format!("🔒 Access denied: {}", snapshot.access_denied),
        String::new(),
        format!(
            "🧠 Queue: {} waiting, {}/{} running",
            queue.queued, queue.running, queue.max_concurrent
        ),
    ];

    for cache in caches {
        lines.push(format!(
            "💾 Cache {}: {} entries, {} hits, {} misses \\({}%\\)",
            escape_markdown_v2(cache.name),
            cache.size,
            cache.hits,
            cache.misses,
            escape_markdown_v2(&format!("{:.1}", cache.hit_rate))
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_outcomes_are_counted_separately() {
        let stats = Stats::new();
        stats.record_request();
        stats.record_request();
        stats.record_rejected();
        stats.record_outcome(JobOutcome::Delivered { from_cache: true });
        stats.record_outcome(JobOutcome::Delivered { from_cache: false });
        stats.record_outcome(JobOutcome::Failed);
        stats.record_outcome(JobOutcome::TimedOut);
        stats.record_outcome(JobOutcome::AccessDenied);

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.rejected_requests, 1);
        assert_eq!(snap.succeeded, 2);
        assert_eq!(snap.served_from_cache, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.access_denied, 1);
    }

    #[test]
    fn test_outcome_from_fetch_error() {
        assert_eq!(
            JobOutcome::from_fetch_error(&FetchError::Timeout(Duration::from_secs(1))),
            JobOutcome::TimedOut
        );
        assert_eq!(
            JobOutcome::from_fetch_error(&FetchError::OutputMissing { job_id: "x".into() }),
            JobOutcome::Failed
        );
    }

    #[test]
    fn test_render_report() {
        let snapshot = StatsSnapshot {
            uptime: Duration::from_secs(125),
            total_requests: 10,
            succeeded: 7,
            served_from_cache: 2,
            failed: 1,
            ..Default::default()
        };
        let queue = QueueStatus {
            queued: 3,
            running: 1,
            max_concurrent: 1,
            max_queued: 100,
        };
        let caches = [CacheStats {
            name: "files",
            size: 4,
            hits: 2,
            misses: 6,
            hit_rate: 25.0,
        }];

        let report = render_report(&snapshot, &queue, &caches);
        assert!(report.contains("⏱ Uptime: 2:05"));
        assert!(report.contains("✅ Delivered: 7 \\(2 from cache\\)"));
        assert!(report.contains("🧠 Queue: 3 waiting, 1/1 running"));
        assert!(report.ends_with("💾 Cache files: 4 entries, 2 hits, 6 misses \\(25\\.0%\\)"));
    }
}
