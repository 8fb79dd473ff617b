use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use teloxide::types::{ChatId, UserId};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use url::Url;

use crate::core::types::MediaMode;
use crate::download::platform::Platform;
use crate::storage::cache::normalize_url;

/// Job priority in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    /// Regular users
    Normal = 0,
    /// Admins: served before any normal job
    Privileged = 1,
}

/// One requested fetch-and-deliver operation.
///
/// Created on admission, owned by the queue until dequeued, then by the
/// worker task until it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier (UUID, simple form); also the scratch file prefix
    pub id: String,
    pub requester: UserId,
    pub destination: ChatId,
    pub source_url: Url,
    pub mode: MediaMode,
    pub platform: Platform,
    pub enqueued_at: DateTime<Utc>,
    pub priority: JobPriority,
}

/// Identity used by the duplicate guard: same link, same chat, same mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    url: String,
    chat: i64,
    mode: MediaMode,
}

impl Job {
    /// Creates a new job with a unique ID.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use teloxide::types::{ChatId, UserId};
    /// use clipfetch::core::types::MediaMode;
    /// use clipfetch::download::queue::{Job, JobPriority};
    ///
    /// let url = url::Url::parse("https://youtu.be/abc").unwrap();
    /// let job = Job::new(UserId(1), ChatId(1), url, MediaMode::Video, JobPriority::Normal);
    /// ```
    pub fn new(requester: UserId, destination: ChatId, source_url: Url, mode: MediaMode, priority: JobPriority) -> Self {
        let platform = Platform::detect(&source_url);
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            requester,
            destination,
            source_url,
            mode,
            platform,
            enqueued_at: Utc::now(),
            priority,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            url: normalize_url(&self.source_url),
            chat: self.destination.0,
            mode: self.mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("queue is full ({limit} jobs)")]
    QueueFull { limit: usize },
    #[error("the same request is already queued or running")]
    Duplicate,
}

/// Two-tier FIFO: privileged jobs always dequeue before normal ones.
#[derive(Debug, Default)]
pub struct PendingJobs {
    privileged: VecDeque<Job>,
    normal: VecDeque<Job>,
}

impl PendingJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the job to its tier and returns its 1-based position.
    pub fn push(&mut self, job: Job) -> usize {
        match job.priority {
            JobPriority::Privileged => {
                self.privileged.push_back(job);
                self.privileged.len()
            }
            JobPriority::Normal => {
                self.normal.push_back(job);
                self.privileged.len() + self.normal.len()
            }
        }
    }

    pub fn pop(&mut self) -> Option<Job> {
        self.privileged.pop_front().or_else(|| self.normal.pop_front())
    }

    pub fn len(&self) -> usize {
        self.privileged.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 1-based position of a job in dequeue order.
    pub fn position(&self, job_id: &str) -> Option<usize> {
        self.privileged
            .iter()
            .chain(self.normal.iter())
            .position(|job| job.id == job_id)
            .map(|pos| pos + 1)
    }
}

/// Where an accepted job landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A worker slot was free, the scheduler starts the job on this wake-up
    Started,
    /// 1-based position among jobs waiting for a slot
    Queued { position: usize },
}

/// Point-in-time view for /stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub queued: usize,
    pub running: usize,
    pub max_concurrent: usize,
    pub max_queued: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: PendingJobs,
    running: usize,
    /// Keys of queued and running jobs
    active: HashSet<JobKey>,
}

/// Executes one dequeued job. Must not assume anything about other jobs.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: Job);

    /// Called by the supervisor after `handle` panicked for `job`.
    async fn on_panic(&self, _job: &Job) {}
}

/// Bounded job queue with a scheduler loop.
///
/// Pending jobs, the running count and the duplicate guard live under one
/// mutex, so dequeueing and taking a slot are a single step. The scheduler
/// loop ([`DownloadQueue::run`]) sleeps on a `Notify` that is signalled by
/// every enqueue and every completion.
pub struct DownloadQueue {
    state: Mutex<QueueState>,
    wake: Notify,
    max_concurrent: usize,
    max_queued: usize,
}

impl DownloadQueue {
    pub fn new(max_concurrent: usize, max_queued: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            max_concurrent: max_concurrent.max(1),
            max_queued: max_queued.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Adds a job and tells whether it takes a free slot right away or waits.
    ///
    /// Decided under the same lock the scheduler drains with, so the answer
    /// holds even when the scheduler wakes before the caller replies.
    pub async fn enqueue(&self, job: Job) -> Result<Admission, EnqueueError> {
        let key = job.key();
        let mut state = self.state.lock().await;

        if state.active.contains(&key) {
            log::warn!(
                "Duplicate job for {} in chat {} ({}), skipping",
                job.source_url,
                job.destination.0,
                job.mode
            );
            return Err(EnqueueError::Duplicate);
        }
        if state.pending.len() >= self.max_queued {
            log::warn!("Queue is full ({} jobs), rejecting {}", state.pending.len(), job.source_url);
            return Err(EnqueueError::QueueFull { limit: self.max_queued });
        }

        log::info!(
            "Queued job {} ({:?}, {}, {}) from user {}",
            job.id,
            job.priority,
            job.platform,
            job.mode,
            job.requester.0
        );
        state.active.insert(key);
        let free_slots = self.max_concurrent.saturating_sub(state.running);
        let position = state.pending.push(job);
        drop(state);

        self.wake.notify_one();
        if position <= free_slots {
            Ok(Admission::Started)
        } else {
            Ok(Admission::Queued {
                position: position - free_slots,
            })
        }
    }

    /// Dequeues as many jobs as there are free slots and marks them running.
    ///
    /// A no-op when the queue is empty or all slots are taken, so calling it
    /// again never over-commits.
    pub async fn drain(&self) -> Vec<Job> {
        let mut state = self.state.lock().await;
        let mut started = Vec::new();
        while state.running < self.max_concurrent {
            let Some(job) = state.pending.pop() else {
                break;
            };
            state.running += 1;
            started.push(job);
        }
        started
    }

    /// Frees the slot of a finished job (any outcome) and wakes the scheduler.
    pub async fn complete(&self, job: &Job) {
        let mut state = self.state.lock().await;
        state.running = state.running.saturating_sub(1);
        state.active.remove(&job.key());
        drop(state);
        self.wake.notify_one();
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        QueueStatus {
            queued: state.pending.len(),
            running: state.running,
            max_concurrent: self.max_concurrent,
            max_queued: self.max_queued,
        }
    }

    pub async fn position(&self, job_id: &str) -> Option<usize> {
        self.state.lock().await.pending.position(job_id)
    }

    /// Scheduler loop. Never returns; abort the task to stop it.
    pub async fn run<H: JobHandler>(self: Arc<Self>, handler: Arc<H>) {
        log::info!("Queue scheduler started ({} worker slot(s))", self.max_concurrent);
        loop {
            for job in self.drain().await {
                self.spawn_supervised(job, Arc::clone(&handler));
            }
            self.wake.notified().await;
        }
    }

    /// Runs the job in its own task; the supervisor frees the slot whatever happens.
    fn spawn_supervised<H: JobHandler>(self: &Arc<Self>, job: Job, handler: Arc<H>) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            log::info!("Starting job {} ({})", job.id, job.source_url);
            let worker = {
                let handler = Arc::clone(&handler);
                let job = job.clone();
                tokio::spawn(async move { handler.handle(job).await })
            };

            if let Err(e) = worker.await {
                if e.is_panic() {
                    log::error!("Job {} panicked: {}", job.id, e);
                    handler.on_panic(&job).await;
                } else {
                    log::warn!("Job {} was cancelled: {}", job.id, e);
                }
            }
            queue.complete(&job).await;
        });
    }
}
