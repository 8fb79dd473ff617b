//! clipfetch - Telegram bot that fetches media from links with yt-dlp
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, rate limiting, stats
//! - `download`: platform table, fetch executor, progress, job queue and pipeline
//! - `storage`: metadata and file caches
//! - `telegram`: bot wiring, handlers and the notifier boundary

#![allow(clippy::too_many_arguments)]

pub mod cli;
pub mod core;
pub mod download;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult, RateLimiter};
pub use download::{DownloadQueue, Fetcher, Pipeline, YtDlpFetcher};
pub use storage::{FileCache, MetadataCache};
pub use telegram::{Notifier, TelegramNotifier};
