//! Job pipeline: everything that happens to a job once it has a worker slot.
//!
//! status message → file cache → metadata (cache or probe, access pre-check)
//! → fetch with progress → size check → persist into the file cache
//! → send file with caption → delete status message.
//!
//! Every failure ends in exactly one failure notice and no file send.

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::core::config;
use crate::core::stats::{JobOutcome, Stats};
use crate::core::utils::format_media_caption;
use crate::download::error::FetchError;
use crate::download::metadata::MediaMetadata;
use crate::download::progress::{DownloadStatus, ProgressEvent, ProgressTracker};
use crate::download::queue::{Job, JobHandler};
use crate::download::source::{FetchRequest, Fetcher};
use crate::storage::cache::{file_cache_key, CachedFile, FileCache, MetadataCache};
use crate::telegram::messages;
use crate::telegram::notifier::{FileKind, MessageHandle, NotifyError, Notifier};

/// Pipeline knobs, built from config in `main`.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Minimum delay between two progress edits of the status message
    pub progress_interval: Duration,
    /// Files above this size are not sent
    pub max_upload_bytes: u64,
}

impl PipelineSettings {
    pub fn from_config() -> Self {
        Self {
            progress_interval: config::progress::interval(),
            max_upload_bytes: config::download::max_upload_bytes(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(3),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("file too large: {size_bytes} bytes (limit {limit_bytes})")]
    TooLarge { size_bytes: u64, limit_bytes: u64 },

    #[error("failed to store the file in the cache: {0}")]
    Storage(#[source] io::Error),

    #[error("failed to deliver the file: {0}")]
    Delivery(#[source] NotifyError),
}

impl JobError {
    pub fn outcome(&self) -> JobOutcome {
        match self {
            JobError::Fetch(err) => JobOutcome::from_fetch_error(err),
            _ => JobOutcome::Failed,
        }
    }

    fn category(&self) -> &'static str {
        match self {
            JobError::Fetch(err) => err.subcategory(),
            JobError::TooLarge { .. } => "too_large",
            JobError::Storage(_) => "storage",
            JobError::Delivery(_) => "delivery",
        }
    }
}

/// Runs jobs handed out by the queue.
pub struct Pipeline {
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
    metadata_cache: Arc<MetadataCache>,
    file_cache: Arc<FileCache>,
    stats: Arc<Stats>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        notifier: Arc<dyn Notifier>,
        metadata_cache: Arc<MetadataCache>,
        file_cache: Arc<FileCache>,
        stats: Arc<Stats>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            fetcher,
            notifier,
            metadata_cache,
            file_cache,
            stats,
            settings,
        }
    }

    /// Processes one job to a terminal state and records its outcome.
    pub async fn process_job(&self, job: &Job) -> JobOutcome {
        let starting = DownloadStatus::Starting {
            platform: job.platform.label(),
        };
        let status = match self.notifier.send_message(job.destination, &starting.render()).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("Job {}: failed to send status message: {}", job.id, e);
                None
            }
        };

        let result = self.execute(job, status).await;
        let outcome = match &result {
            Ok(from_cache) => JobOutcome::Delivered {
                from_cache: *from_cache,
            },
            Err(e) => e.outcome(),
        };

        if let Err(e) = &result {
            log::error!("Job {} failed [{}]: {}", job.id, e.category(), e);
            if let Err(send_err) = self
                .notifier
                .send_message(job.destination, &messages::failure_text(e))
                .await
            {
                log::warn!("Job {}: failed to send failure notice: {}", job.id, send_err);
            }
        } else {
            log::info!("Job {} delivered ({:?})", job.id, outcome);
        }

        if let Some(handle) = status {
            if let Err(e) = self.notifier.delete_message(handle).await {
                log::debug!("Job {}: status message not deleted: {}", job.id, e);
            }
        }

        self.stats.record_outcome(outcome);
        outcome
    }

    /// Returns whether the file came from the cache.
    async fn execute(&self, job: &Job, status: Option<MessageHandle>) -> Result<bool, JobError> {
        let key = file_cache_key(&job.source_url, job.mode);

        if let Some(cached) = self.file_cache.lookup(&key).await {
            log::info!("Job {}: file cache hit {}", job.id, cached.path().display());
            self.deliver(job, &cached, status).await?;
            return Ok(true);
        }

        let metadata = self.resolve_metadata(job).await?;
        let title = metadata
            .as_ref()
            .map(|m| m.display_title().to_string())
            .unwrap_or_else(|| job.source_url.to_string());

        let request = FetchRequest::new(job.id.clone(), job.source_url.clone(), job.mode);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let forwarder = status.map(|handle| self.spawn_progress_forwarder(job, handle, title, progress_rx));

        let fetched = self.fetcher.fetch(&request, progress_tx).await;
        if let Some(forwarder) = forwarder {
            // Sender is gone once fetch returns, so the forwarder drains and exits.
            let _ = forwarder.await;
        }
        let fetched = fetched?;

        if fetched.size_bytes > self.settings.max_upload_bytes {
            return Err(JobError::TooLarge {
                size_bytes: fetched.size_bytes,
                limit_bytes: self.settings.max_upload_bytes,
            });
        }

        let cached = self
            .file_cache
            .persist(&key, &job.id, fetched.file, job.mode, metadata.unwrap_or_default())
            .await
            .map_err(JobError::Storage)?;

        self.deliver(job, &cached, status).await?;
        Ok(false)
    }

    /// Metadata from the cache or a probe. Probe failures are not fatal,
    /// except when the probe says the media is not accessible.
    async fn resolve_metadata(&self, job: &Job) -> Result<Option<MediaMetadata>, JobError> {
        let metadata = match self.metadata_cache.lookup(&job.source_url).await {
            Some(cached) => Some(cached),
            None => match self.fetcher.probe(&job.source_url).await {
                Ok(probed) => {
                    self.metadata_cache.store(&job.source_url, probed.clone()).await;
                    Some(probed)
                }
                Err(e @ FetchError::AccessDenied { .. }) => return Err(e.into()),
                Err(e) => {
                    log::warn!("Job {}: probe failed, fetching without metadata: {}", job.id, e);
                    None
                }
            },
        };

        if job.platform.needs_access_check() {
            if let Some(reason) = metadata.as_ref().and_then(|m| m.restriction()) {
                return Err(FetchError::AccessDenied {
                    reason: reason.to_string(),
                }
                .into());
            }
        }
        Ok(metadata)
    }

    fn spawn_progress_forwarder(
        &self,
        job: &Job,
        handle: MessageHandle,
        title: String,
        mut progress_rx: mpsc::UnboundedReceiver<ProgressEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        let platform = job.platform.label();
        let job_id = job.id.clone();
        let mut tracker = ProgressTracker::new(self.settings.progress_interval);

        tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                let Some(progress) = tracker.accept(event, Instant::now()) else {
                    continue;
                };
                let text = DownloadStatus::Downloading {
                    platform,
                    title: title.clone(),
                    progress,
                }
                .render();
                if let Err(e) = notifier.edit_message(handle, &text).await {
                    log::debug!("Job {}: progress update skipped: {}", job_id, e);
                }
            }
        })
    }

    async fn deliver(&self, job: &Job, file: &CachedFile, status: Option<MessageHandle>) -> Result<(), JobError> {
        let title = file.metadata.display_title().to_string();
        if let Some(handle) = status {
            let uploading = DownloadStatus::Uploading {
                platform: job.platform.label(),
                title: title.clone(),
            };
            if let Err(e) = self.notifier.edit_message(handle, &uploading.render()).await {
                log::debug!("Job {}: upload status skipped: {}", job.id, e);
            }
        }

        let caption = format_media_caption(
            job.platform.label(),
            &title,
            file.metadata.author.as_deref(),
            file.metadata.duration_secs,
            Some(file.size_bytes),
        );
        let kind = FileKind::choose(job.mode, file.path(), file.size_bytes);

        match self.notifier.send_file(job.destination, file.path(), kind, &caption).await {
            Ok(()) => Ok(()),
            Err(NotifyError::RateLimited { retry_after }) => {
                log::warn!("Job {}: upload rate limited, retrying in {:?}", job.id, retry_after);
                tokio::time::sleep(retry_after).await;
                self.notifier
                    .send_file(job.destination, file.path(), kind, &caption)
                    .await
                    .map_err(JobError::Delivery)
            }
            Err(e) => Err(JobError::Delivery(e)),
        }
    }
}

#[async_trait]
impl JobHandler for Pipeline {
    async fn handle(&self, job: Job) {
        self.process_job(&job).await;
    }

    async fn on_panic(&self, job: &Job) {
        self.stats.record_outcome(JobOutcome::Failed);
        if let Err(e) = self
            .notifier
            .send_message(job.destination, &messages::generic_failure_text())
            .await
        {
            log::warn!("Job {}: failed to send failure notice: {}", job.id, e);
        }
    }
}
