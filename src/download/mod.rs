//! Download management and processing

pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod platform;
pub mod progress;
pub mod queue;
pub mod scratch;
pub mod source;
pub mod ytdlp_errors;

// Re-exports for convenience
pub use error::FetchError;
pub use metadata::MediaMetadata;
pub use pipeline::{JobError, Pipeline, PipelineSettings};
pub use platform::Platform;
pub use queue::{Admission, DownloadQueue, EnqueueError, Job, JobPriority, QueueStatus};
pub use source::ytdlp::{FetcherSettings, YtDlpFetcher};
pub use source::{FetchRequest, FetchedFile, Fetcher};
