//! Logging initialization and configuration checking
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - Downloader and cookies configuration logging at startup

use anyhow::Result;
use simplelog::*;
use std::fs::File;
use std::path::Path;

use crate::core::config;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to create the file or a logger was already set
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    // Dependencies (hyper, reqwest, teloxide internals) are noisy at info level.
    let config = ConfigBuilder::new()
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("reqwest")
        .add_filter_ignore_str("h2")
        .build();

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Debug, config, log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs the downloader configuration at application startup
///
/// Reports the yt-dlp binary, the scratch/cache directories and whether the
/// cookies file exists. A configured but missing cookies file is logged as an
/// error because private Instagram/YouTube content will then be refused.
pub fn log_downloader_configuration() {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("yt-dlp binary: {}", *config::YTDL_BIN);
    log::info!("Scratch dir:   {}", *config::SCRATCH_DIR);
    log::info!("Cache dir:     {}", *config::CACHE_DIR);
    log::info!(
        "Workers: {}, queue limit: {}",
        *config::queue::MAX_CONCURRENT_DOWNLOADS,
        *config::queue::MAX_QUEUE_SIZE
    );

    match config::YTDL_COOKIES_FILE.as_deref() {
        Some(cookies_file) => {
            let path = Path::new(cookies_file);
            if path.exists() {
                match path.canonicalize() {
                    Ok(abs_path) => log::info!("✅ YTDL_COOKIES_FILE: {}", abs_path.display()),
                    Err(_) => log::warn!("⚠️  YTDL_COOKIES_FILE: {} (exists but cannot canonicalize)", cookies_file),
                }
            } else {
                log::error!("❌ YTDL_COOKIES_FILE: {} (FILE NOT FOUND!)", cookies_file);
                log::error!("   Current directory: {:?}", std::env::current_dir());
            }
        }
        None => log::info!("YTDL_COOKIES_FILE: not set, private content will be refused"),
    }

    if config::admin::ADMIN_IDS.is_empty() {
        log::warn!("⚠️  No ADMIN_IDS configured, every user is rate limited");
    } else {
        log::info!("Admins: {}", config::admin::ADMIN_IDS.len());
    }
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
