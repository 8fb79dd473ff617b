//! In-memory caches for metadata and finished downloads

pub mod cache;

// Re-exports for convenience
pub use cache::{CacheStats, CachedFile, FileCache, MetadataCache};
