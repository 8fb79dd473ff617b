use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use teloxide::types::UserId;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::core::config;

/// How often a user may submit requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPolicy {
    /// Minimum gap between two admitted requests of the same user.
    Cooldown(Duration),
    /// At most `max` admitted requests per fixed `window`.
    Quota { max: u32, window: Duration },
}

impl RateLimitPolicy {
    /// Builds the policy from `RATE_LIMIT_*` environment settings.
    pub fn from_config() -> Self {
        match config::rate_limit::POLICY.trim().to_lowercase().as_str() {
            "quota" => RateLimitPolicy::Quota {
                max: *config::rate_limit::QUOTA,
                window: config::rate_limit::window(),
            },
            "cooldown" => RateLimitPolicy::Cooldown(config::rate_limit::cooldown()),
            other => {
                log::warn!("Unknown RATE_LIMIT_POLICY '{}', using cooldown", other);
                RateLimitPolicy::Cooldown(config::rate_limit::cooldown())
            }
        }
    }
}

/// Request refused: the user has to wait `retry_after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limited, retry after {}s", .retry_after.as_secs())]
pub struct RateLimitError {
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UsageCounter {
    count: u32,
    window_start: Instant,
    last_admitted: Instant,
}

/// Proof of one admission, needed to undo it with [`RateLimiter::refund`].
///
/// Admin admissions carry no recorded usage and refunding them is a no-op.
#[derive(Debug)]
#[must_use = "a ticket should be refunded if the request is not enqueued"]
pub struct AdmissionTicket {
    user: UserId,
    previous: Option<UsageCounter>,
    recorded: Option<UsageCounter>,
}

impl AdmissionTicket {
    pub fn user(&self) -> UserId {
        self.user
    }

    /// `true` when the admission was counted against the user's limit.
    pub fn is_counted(&self) -> bool {
        self.recorded.is_some()
    }
}

/// Per-user request rate limiter.
///
/// Keeps one counter per user. The check and the record happen under one
/// lock, and a refused request changes nothing. Admins are never limited
/// and never counted.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<HashMap<UserId, UsageCounter>>>,
    policy: RateLimitPolicy,
    admins: Arc<HashSet<UserId>>,
}

impl RateLimiter {
    /// Creates a limiter with the given policy and admin set.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::collections::HashSet;
    /// use std::time::Duration;
    /// use clipfetch::core::rate_limiter::{RateLimitPolicy, RateLimiter};
    ///
    /// let limiter = RateLimiter::new(RateLimitPolicy::Cooldown(Duration::from_secs(15)), HashSet::new());
    /// ```
    pub fn new(policy: RateLimitPolicy, admins: HashSet<UserId>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            policy,
            admins: Arc::new(admins),
        }
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }

    /// Checks the request and records it in the same step.
    ///
    /// # Returns
    ///
    /// `Ok(ticket)` when admitted, otherwise a `RateLimitError` with the wait time.
    pub async fn try_admit(&self, user: UserId) -> Result<AdmissionTicket, RateLimitError> {
        self.try_admit_at(user, Instant::now()).await
    }

    /// Shorthand for callers that do not need to refund.
    pub async fn admit(&self, user: UserId) -> bool {
        self.try_admit(user).await.is_ok()
    }

    async fn try_admit_at(&self, user: UserId, now: Instant) -> Result<AdmissionTicket, RateLimitError> {
        if self.is_admin(user) {
            return Ok(AdmissionTicket {
                user,
                previous: None,
                recorded: None,
            });
        }

        let mut state = self.state.lock().await;
        let previous = state.get(&user).copied();

        let recorded = match self.policy {
            RateLimitPolicy::Cooldown(interval) => {
                if let Some(prev) = previous {
                    let elapsed = now.saturating_duration_since(prev.last_admitted);
                    if elapsed < interval {
                        return Err(RateLimitError {
                            retry_after: interval - elapsed,
                        });
                    }
                }
                UsageCounter {
                    count: previous.map_or(1, |prev| prev.count.saturating_add(1)),
                    window_start: now,
                    last_admitted: now,
                }
            }
            RateLimitPolicy::Quota { max, window } => {
                let mut counter = match previous {
                    Some(prev) if now.saturating_duration_since(prev.window_start) < window => prev,
                    _ => UsageCounter {
                        count: 0,
                        window_start: now,
                        last_admitted: now,
                    },
                };
                if counter.count >= max {
                    let elapsed = now.saturating_duration_since(counter.window_start);
                    return Err(RateLimitError {
                        retry_after: window.saturating_sub(elapsed),
                    });
                }
                counter.count += 1;
                counter.last_admitted = now;
                counter
            }
        };

        state.insert(user, recorded);
        Ok(AdmissionTicket {
            user,
            previous,
            recorded: Some(recorded),
        })
    }

    /// Undoes an admission whose request never made it into the queue.
    ///
    /// If the user was admitted again in the meantime only the count is
    /// decremented; timestamps of the later admission are kept.
    pub async fn refund(&self, ticket: AdmissionTicket) {
        let Some(recorded) = ticket.recorded else {
            return;
        };
        let user = ticket.user;

        let mut state = self.state.lock().await;
        let Some(current) = state.get(&user).copied() else {
            return;
        };

        if current == recorded {
            match ticket.previous {
                Some(previous) => {
                    state.insert(user, previous);
                }
                None => {
                    state.remove(&user);
                }
            }
        } else if current.window_start == recorded.window_start {
            state.insert(
                user,
                UsageCounter {
                    count: current.count.saturating_sub(1),
                    ..current
                },
            );
        }
    }

    /// Time left until the user's next request would be admitted.
    ///
    /// `Duration::ZERO` when the next request would go through.
    pub async fn remaining_time(&self, user: UserId) -> Duration {
        self.remaining_time_at(user, Instant::now()).await
    }

    async fn remaining_time_at(&self, user: UserId, now: Instant) -> Duration {
        if self.is_admin(user) {
            return Duration::ZERO;
        }
        let state = self.state.lock().await;
        let Some(counter) = state.get(&user) else {
            return Duration::ZERO;
        };
        match self.policy {
            RateLimitPolicy::Cooldown(interval) => {
                interval.saturating_sub(now.saturating_duration_since(counter.last_admitted))
            }
            RateLimitPolicy::Quota { max, window } => {
                let elapsed = now.saturating_duration_since(counter.window_start);
                if elapsed >= window || counter.count < max {
                    Duration::ZERO
                } else {
                    window - elapsed
                }
            }
        }
    }

    /// Number of users with a live counter.
    pub async fn tracked_users(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Drops counters that no longer restrict anyone. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now()).await
    }

    async fn cleanup_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock().await;
        let before = state.len();
        let policy = self.policy;
        state.retain(|_, counter| match policy {
            RateLimitPolicy::Cooldown(interval) => now.saturating_duration_since(counter.last_admitted) < interval,
            RateLimitPolicy::Quota { window, .. } => now.saturating_duration_since(counter.window_start) < window,
        });
        before - state.len()
    }

    /// Spawns a background task that runs [`RateLimiter::cleanup`] every `interval`.
    pub fn spawn_cleanup_task(&self, interval: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.cleanup().await;
                if removed > 0 {
                    log::debug!("Rate limiter cleanup: removed {} idle counters", removed);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: UserId = UserId(100);
    const ADMIN: UserId = UserId(1);

    fn quota(max: u32) -> RateLimiter {
        RateLimiter::new(
            RateLimitPolicy::Quota {
                max,
                window: Duration::from_secs(60),
            },
            HashSet::from([ADMIN]),
        )
    }

    fn cooldown(secs: u64) -> RateLimiter {
        RateLimiter::new(
            RateLimitPolicy::Cooldown(Duration::from_secs(secs)),
            HashSet::from([ADMIN]),
        )
    }

    #[tokio::test]
    async fn test_quota_nth_admitted_next_denied() {
        let limiter = quota(3);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.try_admit_at(ALICE, now).await.is_ok());
        }
        let err = limiter.try_admit_at(ALICE, now).await.unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_quota_resets_after_window() {
        let limiter = quota(1);
        let now = Instant::now();
        assert!(limiter.try_admit_at(ALICE, now).await.is_ok());
        assert!(limiter.try_admit_at(ALICE, now + Duration::from_secs(59)).await.is_err());
        assert!(limiter.try_admit_at(ALICE, now + Duration::from_secs(60)).await.is_ok());
    }

    #[tokio::test]
    async fn test_admin_always_admitted_and_not_counted() {
        let limiter = quota(1);
        let now = Instant::now();
        for _ in 0..10 {
            let ticket = limiter.try_admit_at(ADMIN, now).await.unwrap();
            assert!(!ticket.is_counted());
        }
        assert_eq!(limiter.tracked_users().await, 0);
    }

    #[tokio::test]
    async fn test_cooldown_reports_retry_after() {
        let limiter = cooldown(15);
        let now = Instant::now();
        assert!(limiter.try_admit_at(ALICE, now).await.is_ok());

        let err = limiter
            .try_admit_at(ALICE, now + Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(10));

        assert!(limiter.try_admit_at(ALICE, now + Duration::from_secs(15)).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejection_has_no_side_effects() {
        let limiter = cooldown(15);
        let now = Instant::now();
        assert!(limiter.try_admit_at(ALICE, now).await.is_ok());
        // A denied attempt must not push the cooldown further out.
        assert!(limiter.try_admit_at(ALICE, now + Duration::from_secs(14)).await.is_err());
        assert!(limiter.try_admit_at(ALICE, now + Duration::from_secs(15)).await.is_ok());
    }

    #[tokio::test]
    async fn test_refund_restores_quota() {
        let limiter = quota(1);
        let now = Instant::now();
        let ticket = limiter.try_admit_at(ALICE, now).await.unwrap();
        assert!(limiter.try_admit_at(ALICE, now).await.is_err());

        limiter.refund(ticket).await;
        assert!(limiter.try_admit_at(ALICE, now).await.is_ok());
    }

    #[tokio::test]
    async fn test_refund_restores_previous_cooldown() {
        let limiter = cooldown(10);
        let start = Instant::now();
        assert!(limiter.try_admit_at(ALICE, start).await.is_ok());

        let later = start + Duration::from_secs(10);
        let ticket = limiter.try_admit_at(ALICE, later).await.unwrap();
        limiter.refund(ticket).await;

        // Cooldown is measured from the first admission again.
        assert_eq!(limiter.remaining_time_at(ALICE, later).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_refund_after_later_admission_only_decrements() {
        let limiter = quota(2);
        let now = Instant::now();
        let first = limiter.try_admit_at(ALICE, now).await.unwrap();
        let _second = limiter.try_admit_at(ALICE, now + Duration::from_secs(1)).await.unwrap();

        limiter.refund(first).await;
        assert!(limiter.try_admit_at(ALICE, now + Duration::from_secs(2)).await.is_ok());
        assert!(limiter.try_admit_at(ALICE, now + Duration::from_secs(3)).await.is_err());
    }

    #[tokio::test]
    async fn test_remaining_time() {
        let limiter = cooldown(30);
        let now = Instant::now();
        assert_eq!(limiter.remaining_time_at(ALICE, now).await, Duration::ZERO);
        let _ = limiter.try_admit_at(ALICE, now).await.unwrap();
        assert_eq!(
            limiter.remaining_time_at(ALICE, now + Duration::from_secs(12)).await,
            Duration::from_secs(18)
        );
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_counters() {
        let limiter = cooldown(10);
        let now = Instant::now();
        let _ = limiter.try_admit_at(ALICE, now).await.unwrap();
        let _ = limiter.try_admit_at(UserId(200), now + Duration::from_secs(8)).await.unwrap();

        let removed = limiter.cleanup_at(now + Duration::from_secs(11)).await;
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_users().await, 1);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let limiter = quota(1);
        let now = Instant::now();
        assert!(limiter.admit(ALICE).await);
        assert!(limiter.try_admit_at(UserId(200), now).await.is_ok());
    }
}
