use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use teloxide::types::UserId;

/// Reads `key` from the environment and parses it, falling back to `default`
/// when the variable is missing or malformed.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Ignoring invalid value for {}: '{}'", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Expands `~` so paths from `.env` files work the same as from a shell.
fn expand_path(raw: &str) -> String {
    shellexpand::tilde(raw).into_owned()
}

/// Configuration constants for the bot
/// Cached yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// Path to a Netscape cookies file passed to yt-dlp for platforms that accept it
/// Read from YTDL_COOKIES_FILE environment variable
pub static YTDL_COOKIES_FILE: Lazy<Option<String>> = Lazy::new(|| {
    env::var("YTDL_COOKIES_FILE")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(|s| expand_path(&s))
});

/// Scratch directory for in-flight downloads (one file per job)
pub static SCRATCH_DIR: Lazy<String> = Lazy::new(|| {
    expand_path(&env::var("SCRATCH_DIR").unwrap_or_else(|_| "/tmp/clipfetch/scratch".to_string()))
});

/// Directory that owns files referenced by the result cache
pub static CACHE_DIR: Lazy<String> =
    Lazy::new(|| expand_path(&env::var("CACHE_DIR").unwrap_or_else(|_| "/tmp/clipfetch/cache".to_string())));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: clipfetch.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "clipfetch.log".to_string()));

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Parses a comma/space separated list of Telegram user ids.
pub fn parse_admin_ids(raw: &str) -> HashSet<UserId> {
    raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter_map(|part| part.trim().parse::<u64>().ok())
        .filter(|id| *id != 0)
        .map(UserId)
        .collect()
}

/// Admin configuration
pub mod admin {
    use super::*;

    /// Privileged users: exempt from rate limiting and served first.
    /// Read from ADMIN_IDS (comma separated) and the single-id ADMIN_ID.
    pub static ADMIN_IDS: Lazy<HashSet<UserId>> = Lazy::new(|| {
        let mut ids = parse_admin_ids(&env::var("ADMIN_IDS").unwrap_or_default());
        ids.extend(parse_admin_ids(&env::var("ADMIN_ID").unwrap_or_default()));
        ids
    });

    /// Whether /stats is restricted to admins
    pub static STATS_ADMIN_ONLY: Lazy<bool> = Lazy::new(|| env_flag("STATS_ADMIN_ONLY", false));
}

/// Rate limiting configuration
pub mod rate_limit {
    use super::*;

    /// "cooldown" (default) or "quota"
    pub static POLICY: Lazy<String> =
        Lazy::new(|| env::var("RATE_LIMIT_POLICY").unwrap_or_else(|_| "cooldown".to_string()));

    /// Seconds between two admitted requests of the same user (cooldown policy)
    pub static COOLDOWN_SECS: Lazy<u64> = Lazy::new(|| env_parse("RATE_LIMIT_COOLDOWN_SECS", 15));

    /// Requests per window (quota policy)
    pub static QUOTA: Lazy<u32> = Lazy::new(|| env_parse("RATE_LIMIT_QUOTA", 20));

    /// Quota window length in seconds (quota policy), one day by default
    pub static WINDOW_SECS: Lazy<u64> = Lazy::new(|| env_parse("RATE_LIMIT_WINDOW_SECS", 24 * 60 * 60));

    /// Interval of the idle-counter cleanup task
    pub const CLEANUP_INTERVAL_SECS: u64 = 300;

    pub fn cooldown() -> Duration {
        Duration::from_secs(*COOLDOWN_SECS)
    }

    pub fn window() -> Duration {
        Duration::from_secs(*WINDOW_SECS)
    }

    pub fn cleanup_interval() -> Duration {
        Duration::from_secs(CLEANUP_INTERVAL_SECS)
    }
}

/// Queue processing configuration
pub mod queue {
    use super::*;

    /// Maximum number of fetches running at the same time
    pub static MAX_CONCURRENT_DOWNLOADS: Lazy<usize> =
        Lazy::new(|| env_parse("MAX_CONCURRENT_DOWNLOADS", 1usize).max(1));

    /// Maximum number of queued (not yet running) jobs
    pub static MAX_QUEUE_SIZE: Lazy<usize> = Lazy::new(|| env_parse("MAX_QUEUE_SIZE", 100usize).max(1));
}

/// Download configuration
pub mod download {
    use super::*;

    /// Wall-clock limit for one full fetch
    pub static FETCH_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| env_parse("FETCH_TIMEOUT_SECS", 600));

    /// Limit for the metadata probe invocation
    pub static PROBE_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| env_parse("PROBE_TIMEOUT_SECS", 60));

    /// Largest file the bot will try to upload, in megabytes
    pub static MAX_UPLOAD_MB: Lazy<u64> = Lazy::new(|| env_parse("MAX_UPLOAD_MB", 50));

    /// Retry a failed video fetch with lower quality selectors
    pub static QUALITY_FALLBACK: Lazy<bool> = Lazy::new(|| env_flag("QUALITY_FALLBACK", false));

    pub fn fetch_timeout() -> Duration {
        Duration::from_secs(*FETCH_TIMEOUT_SECS)
    }

    pub fn probe_timeout() -> Duration {
        Duration::from_secs(*PROBE_TIMEOUT_SECS)
    }

    pub fn max_upload_bytes() -> u64 {
        *MAX_UPLOAD_MB * 1024 * 1024
    }
}

/// Cache configuration
pub mod cache {
    use super::*;

    /// Result cache TTL, 30 minutes by default
    pub static FILE_TTL_SECS: Lazy<u64> = Lazy::new(|| env_parse("FILE_CACHE_TTL_SECS", 30 * 60));

    pub static FILE_MAX_ENTRIES: Lazy<u64> = Lazy::new(|| env_parse("FILE_CACHE_MAX_ENTRIES", 100));

    /// Metadata cache TTL, 24 hours by default
    pub static METADATA_TTL_SECS: Lazy<u64> = Lazy::new(|| env_parse("METADATA_CACHE_TTL_SECS", 24 * 60 * 60));

    pub static METADATA_MAX_ENTRIES: Lazy<u64> = Lazy::new(|| env_parse("METADATA_CACHE_MAX_ENTRIES", 1000));

    /// Optional JSON file the metadata cache is saved to on shutdown
    pub static METADATA_FILE: Lazy<Option<String>> = Lazy::new(|| {
        env::var("METADATA_CACHE_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| expand_path(&s))
    });

    /// Interval of the expired-entry sweep
    pub const SWEEP_INTERVAL_SECS: u64 = 600;

    pub fn file_ttl() -> Duration {
        Duration::from_secs(*FILE_TTL_SECS)
    }

    pub fn metadata_ttl() -> Duration {
        Duration::from_secs(*METADATA_TTL_SECS)
    }

    pub fn sweep_interval() -> Duration {
        Duration::from_secs(SWEEP_INTERVAL_SECS)
    }
}

/// Progress reporting configuration
pub mod progress {
    use super::*;

    /// Minimum delay between two visible progress edits of one job
    pub static INTERVAL_SECS: Lazy<u64> = Lazy::new(|| env_parse("PROGRESS_INTERVAL_SECS", 3));

    pub fn interval() -> Duration {
        Duration::from_secs(*INTERVAL_SECS)
    }
}

/// Webhook configuration
pub mod webhook {
    use super::*;

    /// Public URL Telegram should deliver updates to
    pub static URL: Lazy<Option<String>> = Lazy::new(|| env::var("WEBHOOK_URL").ok().filter(|s| !s.is_empty()));

    /// Local address the webhook listener binds to
    pub static ADDR: Lazy<String> = Lazy::new(|| env::var("WEBHOOK_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()));
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for Bot API calls; uploads of large videos are slow
    pub const REQUEST_TIMEOUT_SECS: u64 = 900;

    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}
