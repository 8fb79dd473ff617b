//! Recording [`Notifier`] fake

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use clipfetch::telegram::notifier::{FileKind, MessageHandle, Notifier, NotifyError};
use teloxide::types::{ChatId, MessageId};

use super::Timeline;

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Message {
        chat: ChatId,
        message_id: i32,
        text: String,
    },
    Edit {
        message_id: i32,
        text: String,
    },
    Delete {
        message_id: i32,
    },
    File {
        chat: ChatId,
        path: PathBuf,
        kind: FileKind,
        caption: String,
        /// Whether the file existed at send time
        existed: bool,
    },
}

pub struct MockNotifier {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicI32,
    file_attempts: AtomicUsize,
    /// Errors returned by the next `send_file` calls, in order
    file_failures: Mutex<VecDeque<NotifyError>>,
    /// Per-chat delay of the "Sending" status edit, right before the upload
    upload_status_delays: Mutex<HashMap<i64, Duration>>,
    timeline: Timeline,
}

impl MockNotifier {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            next_id: AtomicI32::new(1),
            file_attempts: AtomicUsize::new(0),
            file_failures: Mutex::new(VecDeque::new()),
            upload_status_delays: Mutex::new(HashMap::new()),
            timeline,
        }
    }

    pub fn fail_next_file(&self, err: NotifyError) {
        self.file_failures.lock().unwrap().push_back(err);
    }

    /// Stalls the "Sending" edit for `chat`, holding its delivery between
    /// cache persist and upload.
    pub fn delay_upload_status(&self, chat: i64, delay: Duration) {
        self.upload_status_delays.lock().unwrap().insert(chat, delay);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn file_attempts(&self) -> usize {
        self.file_attempts.load(Ordering::SeqCst)
    }

    pub fn files_to(&self, chat: i64) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::File { chat: c, .. } if c.0 == chat))
            .collect()
    }

    pub fn messages_to(&self, chat: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Message { chat: c, text, .. } if c.0 == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<i32> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Delete { message_id } => Some(message_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_message(&self, chat: ChatId, text: &str) -> Result<MessageHandle, NotifyError> {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(Sent::Message {
            chat,
            message_id,
            text: text.to_string(),
        });
        Ok(MessageHandle {
            chat,
            message_id: MessageId(message_id),
        })
    }

    async fn edit_message(&self, handle: MessageHandle, text: &str) -> Result<(), NotifyError> {
        if text.starts_with("📤") {
            let delay = self.upload_status_delays.lock().unwrap().get(&handle.chat.0).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.sent.lock().unwrap().push(Sent::Edit {
            message_id: handle.message_id.0,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Sent::Delete {
            message_id: handle.message_id.0,
        });
        Ok(())
    }

    async fn send_file(&self, chat: ChatId, path: &Path, kind: FileKind, caption: &str) -> Result<(), NotifyError> {
        self.file_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.file_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.timeline.lock().unwrap().push(format!("send_file {}", chat.0));
        self.sent.lock().unwrap().push(Sent::File {
            chat,
            path: path.to_path_buf(),
            kind,
            caption: caption.to_string(),
            existed: path.exists(),
        });
        Ok(())
    }
}
