//! Telegram bot handler tree configuration
//!
//! Request intake lives in plain async functions ([`submit_request`],
//! [`stats_report`]) that return the reply text, so tests can drive them
//! without a Bot. The dptree endpoints only extract fields and send replies.

use std::sync::Arc;

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::Message;
use url::Url;

use crate::core::rate_limiter::RateLimiter;
use crate::core::stats::{render_report, Stats};
use crate::core::types::MediaMode;
use crate::download::progress::DownloadStatus;
use crate::download::queue::{Admission, DownloadQueue, Job, JobPriority};
use crate::storage::cache::{FileCache, MetadataCache};
use crate::telegram::bot::Command;
use crate::telegram::messages;
use crate::telegram::notifier::Notifier;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub queue: Arc<DownloadQueue>,
    pub rate_limiter: Arc<RateLimiter>,
    pub notifier: Arc<dyn Notifier>,
    pub stats: Arc<Stats>,
    pub metadata_cache: Arc<MetadataCache>,
    pub file_cache: Arc<FileCache>,
    /// Restrict /stats to admins
    pub stats_admin_only: bool,
}

/// Returns the first `http(s)` URL of a message text.
pub fn extract_url(text: &str) -> Option<Url> {
    text.split_whitespace()
        .filter(|token| token.starts_with("http://") || token.starts_with("https://"))
        .find_map(|token| Url::parse(token).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
}

/// Admission + enqueue for one inbound request. Returns the reply text.
///
/// Usage is only counted when the job actually lands in the queue: if the
/// queue refuses it, the rate limiter ticket is refunded. A job that takes a
/// free slot is reported as started, never with a queue position.
pub async fn submit_request(deps: &HandlerDeps, requester: UserId, chat: ChatId, text: &str, mode: MediaMode) -> String {
    let Some(url) = extract_url(text) else {
        return messages::invalid_url_text();
    };
    deps.stats.record_request();

    let ticket = match deps.rate_limiter.try_admit(requester).await {
        Ok(ticket) => ticket,
        Err(e) => {
            log::info!("User {} rate limited: {}", requester.0, e);
            deps.stats.record_rejected();
            return messages::rate_limited_text(e.retry_after);
        }
    };

    let priority = if deps.rate_limiter.is_admin(requester) {
        JobPriority::Privileged
    } else {
        JobPriority::Normal
    };
    let job = Job::new(requester, chat, url, mode, priority);

    match deps.queue.enqueue(job).await {
        Ok(admission) => {
            drop(ticket);
            match admission {
                Admission::Started => messages::job_started_text(),
                Admission::Queued { position } => DownloadStatus::Queued { position }.render(),
            }
        }
        Err(e) => {
            deps.rate_limiter.refund(ticket).await;
            deps.stats.record_rejected();
            messages::enqueue_error_text(&e)
        }
    }
}

/// /stats reply; admin-only when configured.
pub async fn stats_report(deps: &HandlerDeps, requester: UserId) -> String {
    if deps.stats_admin_only && !deps.rate_limiter.is_admin(requester) {
        return messages::stats_denied_text();
    }
    let caches = [deps.metadata_cache.stats().await, deps.file_cache.stats().await];
    render_report(&deps.stats.snapshot(), &deps.queue.status().await, &caches)
}

async fn reply(deps: &HandlerDeps, chat: ChatId, text: &str) -> Result<(), HandlerError> {
    deps.notifier.send_message(chat, text).await?;
    Ok(())
}

/// Creates the main dispatcher handler tree
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    dptree::entry()
        .branch(command_handler(deps.clone()))
        .branch(url_message_handler(deps))
}

/// Handler for bot commands (/start, /help, /audio, /video, /stats)
fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        move |msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                log::info!("Received command {:?} from chat {}", cmd, msg.chat.id);
                let Some(user) = msg.from.as_ref().map(|u| u.id) else {
                    return Ok(());
                };

                let text = match cmd {
                    Command::Start => messages::start_text(),
                    Command::Help => messages::help_text(),
                    Command::Audio(args) => submit_request(&deps, user, msg.chat.id, &args, MediaMode::AudioOnly).await,
                    Command::Video(args) => submit_request(&deps, user, msg.chat.id, &args, MediaMode::Video).await,
                    Command::Stats => stats_report(&deps, user).await,
                };
                reply(&deps, msg.chat.id, &text).await
            }
        },
    ))
}

/// Handler for plain messages starting with a link
fn url_message_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| {
            msg.text()
                .map(str::trim_start)
                .is_some_and(|text| text.starts_with("http://") || text.starts_with("https://"))
        })
        .endpoint(move |msg: Message| {
            let deps = deps.clone();
            async move {
                let (Some(user), Some(text)) = (msg.from.as_ref().map(|u| u.id), msg.text()) else {
                    return Ok(());
                };
                let reply_text = submit_request(&deps, user, msg.chat.id, text, MediaMode::Video).await;
                reply(&deps, msg.chat.id, &reply_text).await
            }
        })
}
