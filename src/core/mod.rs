//! Core utilities, configuration, and common functionality

pub mod config;
pub mod error;
pub mod logging;
pub mod process;
pub mod rate_limiter;
pub mod stats;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use error::{AppError, AppResult};
pub use logging::{init_logger, log_downloader_configuration};
pub use rate_limiter::{RateLimitError, RateLimitPolicy, RateLimiter};
pub use types::MediaMode;
pub use utils::escape_markdown_v2;
