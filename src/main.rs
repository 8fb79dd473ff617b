use anyhow::Result;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tokio::time::interval;

use clipfetch::cli::{Cli, Commands};
use clipfetch::core::stats::Stats;
use clipfetch::core::types::MediaMode;
use clipfetch::core::utils::sanitize_filename;
use clipfetch::core::{config, init_logger, log_downloader_configuration, RateLimitPolicy, RateLimiter};
use clipfetch::download::progress::{terminal_line, ProgressEvent};
use clipfetch::download::source::{FetchRequest, Fetcher};
use clipfetch::download::{DownloadQueue, FetcherSettings, Pipeline, PipelineSettings, YtDlpFetcher};
use clipfetch::storage::{FileCache, MetadataCache};
use clipfetch::telegram::{create_bot, schema, setup_bot_commands, HandlerDeps, TelegramNotifier};

/// Main entry point for the bot and its one-off CLI commands
///
/// # Errors
/// Returns an error if initialization fails (logging, bot creation, cache directory).
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Panics inside spawned tasks are caught by their supervisors; this only logs them.
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
        if let Some(msg) = panic_info.payload().downcast_ref::<&str>() {
            log::error!("Panic message: {}", msg);
        }
    }));

    // .env first: it may set LOG_FILE_PATH
    let _ = dotenv();
    init_logger(&config::LOG_FILE_PATH)?;

    match cli.command {
        None => run_bot(false).await,
        Some(Commands::Run { webhook }) => run_bot(webhook).await,
        Some(Commands::Download { url, audio, output }) => {
            let mode = if audio { MediaMode::AudioOnly } else { MediaMode::Video };
            run_cli_download(&url, mode, &output).await
        }
        Some(Commands::Info { url, json }) => run_cli_info(&url, json).await,
    }
}

async fn run_bot(use_webhook: bool) -> Result<()> {
    if config::BOT_TOKEN.is_empty() {
        anyhow::bail!("BOT_TOKEN (or TELOXIDE_TOKEN) is not set");
    }
    log_downloader_configuration();

    let bot = create_bot(&config::BOT_TOKEN)?;
    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    let rate_limiter = Arc::new(RateLimiter::new(
        RateLimitPolicy::from_config(),
        config::admin::ADMIN_IDS.clone(),
    ));
    let limiter_cleanup = rate_limiter.spawn_cleanup_task(config::rate_limit::cleanup_interval());

    let metadata_cache = Arc::new(MetadataCache::new(
        *config::cache::METADATA_MAX_ENTRIES,
        config::cache::metadata_ttl(),
    ));
    if let Some(path) = config::cache::METADATA_FILE.as_deref() {
        match metadata_cache.load_from_file(Path::new(path)).await {
            Ok(loaded) => log::info!("Loaded {} metadata cache entries from {}", loaded, path),
            Err(e) => log::warn!("Metadata cache not loaded from {}: {}", path, e),
        }
    }

    let file_cache = Arc::new(FileCache::new(
        PathBuf::from(config::CACHE_DIR.as_str()),
        *config::cache::FILE_MAX_ENTRIES,
        config::cache::file_ttl(),
    ));
    let leftovers = file_cache.prepare_dir().await?;
    if leftovers > 0 {
        log::info!("Removed {} leftover files from {}", leftovers, file_cache.dir().display());
    }

    let sweeper = {
        let metadata_cache = Arc::clone(&metadata_cache);
        let file_cache = Arc::clone(&file_cache);
        tokio::spawn(async move {
            let mut ticker = interval(config::cache::sweep_interval());
            loop {
                ticker.tick().await;
                let files = file_cache.sweep().await;
                let metadata = metadata_cache.sweep().await;
                if files + metadata > 0 {
                    log::debug!("Cache sweep: {} files, {} metadata entries removed", files, metadata);
                }
                save_metadata_cache(&metadata_cache).await;
            }
        })
    };

    let stats = Arc::new(Stats::new());
    let notifier = Arc::new(TelegramNotifier::new(bot.clone()));
    let fetcher = Arc::new(YtDlpFetcher::new(FetcherSettings::from_config()));
    let pipeline = Arc::new(Pipeline::new(
        fetcher,
        notifier.clone(),
        Arc::clone(&metadata_cache),
        Arc::clone(&file_cache),
        Arc::clone(&stats),
        PipelineSettings::from_config(),
    ));

    let queue = Arc::new(DownloadQueue::new(
        *config::queue::MAX_CONCURRENT_DOWNLOADS,
        *config::queue::MAX_QUEUE_SIZE,
    ));
    let scheduler = tokio::spawn(Arc::clone(&queue).run(pipeline));

    let deps = HandlerDeps {
        queue,
        rate_limiter,
        notifier,
        stats,
        metadata_cache: Arc::clone(&metadata_cache),
        file_cache,
        stats_admin_only: *config::admin::STATS_ADMIN_ONLY,
    };

    let webhook_url = if use_webhook {
        config::webhook::URL.clone()
    } else {
        None
    };
    if use_webhook && webhook_url.is_none() {
        log::warn!("--webhook given but WEBHOOK_URL is not set, falling back to long polling");
    }

    let mut dispatcher = Dispatcher::builder(bot.clone(), schema(deps))
        .enable_ctrlc_handler()
        .build();

    match webhook_url {
        Some(url) => {
            use teloxide::update_listeners::webhooks;

            let addr: SocketAddr = config::webhook::ADDR.parse()?;
            let url = url::Url::parse(&url)?;
            log::info!("Starting bot in webhook mode at {} (listening on {})", url, addr);
            let listener = webhooks::axum(bot, webhooks::Options::new(addr, url)).await?;
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await;
        }
        None => {
            use teloxide::update_listeners::Polling;

            log::info!("Starting bot in long polling mode");
            let listener = Polling::builder(bot).drop_pending_updates().build();
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await;
        }
    }

    log::info!("Dispatcher stopped, shutting down");
    scheduler.abort();
    sweeper.abort();
    limiter_cleanup.abort();
    save_metadata_cache(&metadata_cache).await;
    Ok(())
}

async fn save_metadata_cache(cache: &MetadataCache) {
    let Some(path) = config::cache::METADATA_FILE.as_deref() else {
        return;
    };
    match cache.save_to_file(Path::new(path)).await {
        Ok(saved) => log::debug!("Saved {} metadata cache entries to {}", saved, path),
        Err(e) => log::warn!("Failed to save metadata cache to {}: {}", path, e),
    }
}

/// One-off fetch through the same executor the bot uses.
async fn run_cli_download(raw_url: &str, mode: MediaMode, output_dir: &Path) -> Result<()> {
    let url = url::Url::parse(raw_url)?;
    let fetcher = YtDlpFetcher::new(FetcherSettings::from_config());

    let title = match fetcher.probe(&url).await {
        Ok(metadata) => {
            println!("{} ({})", metadata.display_title(), metadata.author.as_deref().unwrap_or("unknown"));
            Some(metadata.title)
        }
        Err(e) => {
            log::warn!("Probe failed, continuing without metadata: {}", e);
            None
        }
    };

    let job_id = uuid::Uuid::new_v4().simple().to_string();
    let request = FetchRequest::new(job_id.clone(), url, mode);
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            eprint!("\r{}", terminal_line(&event));
        }
        eprintln!();
    });

    let fetched = fetcher.fetch(&request, progress_tx).await;
    let _ = printer.await;
    let fetched = fetched?;

    let stem = title
        .map(|t| sanitize_filename(&t))
        .filter(|t| !t.is_empty())
        .unwrap_or(job_id);
    let extension = fetched.file.extension().unwrap_or_else(|| "bin".to_string());
    fs_err::tokio::create_dir_all(output_dir).await?;
    let dest = output_dir.join(format!("{}.{}", stem, extension));
    let saved = fetched.file.persist(&dest)?;

    println!("Saved {} ({} bytes)", saved.display(), fetched.size_bytes);
    Ok(())
}

async fn run_cli_info(raw_url: &str, json: bool) -> Result<()> {
    let url = url::Url::parse(raw_url)?;
    let fetcher = YtDlpFetcher::new(FetcherSettings::from_config());
    let metadata = fetcher.probe(&url).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("Title:        {}", metadata.display_title());
    println!("Author:       {}", metadata.author.as_deref().unwrap_or("-"));
    println!(
        "Duration:     {}",
        metadata
            .duration_secs
            .map(clipfetch::core::utils::format_duration)
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Extractor:    {}", metadata.extractor.as_deref().unwrap_or("-"));
    println!("Availability: {}", metadata.availability.as_deref().unwrap_or("-"));
    if metadata.is_live {
        println!("Live stream");
    }
    Ok(())
}
