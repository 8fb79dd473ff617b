//! Outbound side of the bot.
//!
//! The pipeline only talks to [`Notifier`]; [`TelegramNotifier`] implements it
//! over the Bot API, tests plug in a recording fake.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId, ParseMode};
use teloxide::{ApiError, RequestError};
use thiserror::Error;

use crate::core::types::MediaMode;
use crate::core::utils::escape_markdown_v2;

/// Files above this size are sent as documents even when they are media.
const MAX_INLINE_MEDIA_BYTES: u64 = 50 * 1024 * 1024;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "ogg", "opus", "flac", "wav"];

/// A sent message that can later be edited or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHandle {
    pub chat: ChatId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// Flood control; the request may be repeated after the delay
    #[error("rate limited by transport, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    /// The message to edit or delete no longer exists
    #[error("message not found")]
    NotFound,
    #[error("transport request failed: {0}")]
    Request(String),
}

/// How a finished file is presented in the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Video,
    Audio,
    Document,
}

impl FileKind {
    /// Picks the presentation from the job mode, the file extension and its size.
    pub fn choose(mode: MediaMode, path: &Path, size_bytes: u64) -> FileKind {
        if size_bytes > MAX_INLINE_MEDIA_BYTES {
            return FileKind::Document;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match mode {
            MediaMode::Video if VIDEO_EXTENSIONS.contains(&ext.as_str()) => FileKind::Video,
            MediaMode::AudioOnly if AUDIO_EXTENSIONS.contains(&ext.as_str()) => FileKind::Audio,
            _ => FileKind::Document,
        }
    }
}

/// Chat transport used by the job pipeline. All texts are MarkdownV2.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, chat: ChatId, text: &str) -> Result<MessageHandle, NotifyError>;

    async fn edit_message(&self, handle: MessageHandle, text: &str) -> Result<(), NotifyError>;

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), NotifyError>;

    async fn send_file(&self, chat: ChatId, path: &Path, kind: FileKind, caption: &str) -> Result<(), NotifyError>;
}

fn is_markdown_parse_error(err: &RequestError) -> bool {
    err.to_string().to_lowercase().contains("can't parse entities")
}

impl From<RequestError> for NotifyError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::RetryAfter(seconds) => NotifyError::RateLimited {
                retry_after: seconds.duration(),
            },
            RequestError::Api(ApiError::MessageToEditNotFound | ApiError::MessageToDeleteNotFound) => {
                NotifyError::NotFound
            }
            other => NotifyError::Request(other.to_string()),
        }
    }
}

/// [`Notifier`] over teloxide.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_message(&self, chat: ChatId, text: &str) -> Result<MessageHandle, NotifyError> {
        let sent = match self
            .bot
            .send_message(chat, text)
            .parse_mode(ParseMode::MarkdownV2)
            .await
        {
            Ok(msg) => msg,
            Err(e) if is_markdown_parse_error(&e) => {
                log::warn!("MarkdownV2 rejected for chat {}, re-sending escaped: {}", chat.0, e);
                self.bot
                    .send_message(chat, escape_markdown_v2(text))
                    .parse_mode(ParseMode::MarkdownV2)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };
        Ok(MessageHandle {
            chat,
            message_id: sent.id,
        })
    }

    async fn edit_message(&self, handle: MessageHandle, text: &str) -> Result<(), NotifyError> {
        let result = self
            .bot
            .edit_message_text(handle.chat, handle.message_id, text)
            .parse_mode(ParseMode::MarkdownV2)
            .await;

        let result = match result {
            Err(e) if is_markdown_parse_error(&e) => {
                self.bot
                    .edit_message_text(handle.chat, handle.message_id, escape_markdown_v2(text))
                    .parse_mode(ParseMode::MarkdownV2)
                    .await
            }
            other => other,
        };

        match result {
            Ok(_) => Ok(()),
            // Same text twice, nothing to do.
            Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), NotifyError> {
        self.bot.delete_message(handle.chat, handle.message_id).await?;
        Ok(())
    }

    async fn send_file(&self, chat: ChatId, path: &Path, kind: FileKind, caption: &str) -> Result<(), NotifyError> {
        log::info!("Sending {:?} {} to chat {}", kind, path.display(), chat.0);
        let file = InputFile::file(path.to_path_buf());
        let caption = caption.to_string();

        match kind {
            FileKind::Video => {
                self.bot
                    .send_video(chat, file)
                    .caption(caption)
                    .parse_mode(ParseMode::MarkdownV2)
                    .supports_streaming(true)
                    .await?;
            }
            FileKind::Audio => {
                self.bot
                    .send_audio(chat, file)
                    .caption(caption)
                    .parse_mode(ParseMode::MarkdownV2)
                    .await?;
            }
            FileKind::Document => {
                self.bot
                    .send_document(chat, file)
                    .caption(caption)
                    .parse_mode(ParseMode::MarkdownV2)
                    .await?;
            }
        }
        Ok(())
    }
}
