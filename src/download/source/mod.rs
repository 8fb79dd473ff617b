//! Fetch backend abstraction.
//!
//! The queue and the pipeline only talk to [`Fetcher`]; the production
//! implementation is [`ytdlp::YtDlpFetcher`], tests plug in scripted fakes.

pub mod ytdlp;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::core::types::MediaMode;
use crate::download::error::FetchError;
use crate::download::metadata::MediaMetadata;
use crate::download::platform::Platform;
use crate::download::progress::ProgressEvent;
use crate::download::scratch::ScratchFile;

/// Request parameters for one fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Unique token, also the scratch file prefix
    pub job_id: String,
    pub url: Url,
    pub mode: MediaMode,
    pub platform: Platform,
}

impl FetchRequest {
    pub fn new(job_id: impl Into<String>, url: Url, mode: MediaMode) -> Self {
        let platform = Platform::detect(&url);
        Self {
            job_id: job_id.into(),
            url,
            mode,
            platform,
        }
    }
}

/// Output from a successful fetch.
#[derive(Debug)]
pub struct FetchedFile {
    /// Owns the file in the scratch dir until persisted or dropped
    pub file: ScratchFile,
    pub size_bytes: u64,
    /// Height cap of the selector that succeeded; `None` for audio or "best"
    pub max_height: Option<u32>,
}

/// Trait for fetch backends.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Human-readable name of this backend (e.g., "yt-dlp")
    fn name(&self) -> &str;

    /// Metadata lookup without downloading.
    async fn probe(&self, url: &Url) -> Result<MediaMetadata, FetchError>;

    /// Execute the fetch, sending progress updates through the channel.
    ///
    /// On error no scratch artifacts of `request.job_id` remain.
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress_tx: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<FetchedFile, FetchError>;
}
