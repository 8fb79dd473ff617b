//! Common test utilities
//!
//! This module is shared across all integration tests

#![allow(dead_code)]

pub mod fetcher;
pub mod notifier;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use clipfetch::core::stats::Stats;
use clipfetch::core::types::MediaMode;
use clipfetch::download::queue::{Job, JobPriority};
use clipfetch::download::{Pipeline, PipelineSettings};
use clipfetch::storage::{FileCache, MetadataCache};
use teloxide::types::{ChatId, UserId};
use tempfile::TempDir;

pub use fetcher::{FetchScript, ProbeScript, ScriptedFetcher};
pub use notifier::{MockNotifier, Sent};

/// Ordered log of what mocks did, shared between them.
pub type Timeline = Arc<Mutex<Vec<String>>>;

pub fn timeline_entries(timeline: &Timeline) -> Vec<String> {
    timeline.lock().unwrap().clone()
}

pub fn job(url: &str, chat: i64, mode: MediaMode, priority: JobPriority) -> Job {
    Job::new(
        UserId(chat as u64),
        ChatId(chat),
        url::Url::parse(url).unwrap(),
        mode,
        priority,
    )
}

pub fn video_job(url: &str, chat: i64) -> Job {
    job(url, chat, MediaMode::Video, JobPriority::Normal)
}

/// Pipeline wired to mocks, with scratch and cache dirs in a temp dir.
pub struct Harness {
    pub dir: TempDir,
    pub timeline: Timeline,
    pub fetcher: Arc<ScriptedFetcher>,
    pub notifier: Arc<MockNotifier>,
    pub metadata_cache: Arc<MetadataCache>,
    pub file_cache: Arc<FileCache>,
    pub stats: Arc<Stats>,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(PipelineSettings {
            progress_interval: Duration::ZERO,
            max_upload_bytes: 1024 * 1024,
        })
        .await
    }

    pub async fn with_settings(settings: PipelineSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let timeline: Timeline = Arc::default();
        let fetcher = Arc::new(ScriptedFetcher::new(dir.path().join("scratch"), timeline.clone()));
        let notifier = Arc::new(MockNotifier::new(timeline.clone()));
        let metadata_cache = Arc::new(MetadataCache::new(100, Duration::from_secs(3600)));
        let file_cache = Arc::new(FileCache::new(dir.path().join("cache"), 100, Duration::from_secs(3600)));
        file_cache.prepare_dir().await.unwrap();
        let stats = Arc::new(Stats::new());

        let pipeline = Arc::new(Pipeline::new(
            fetcher.clone(),
            notifier.clone(),
            metadata_cache.clone(),
            file_cache.clone(),
            stats.clone(),
            settings,
        ));

        Self {
            dir,
            timeline,
            fetcher,
            notifier,
            metadata_cache,
            file_cache,
            stats,
            pipeline,
        }
    }

    pub fn scratch_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("scratch")
    }

    /// Files currently in the scratch dir.
    pub fn scratch_files(&self) -> Vec<String> {
        match std::fs::read_dir(self.scratch_dir()) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
