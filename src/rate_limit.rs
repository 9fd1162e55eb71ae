//! Per-user rate limiting for document creation.
//!
//! Each user gets a sliding window of recent allowed attempts. A denied
//! attempt is not recorded, so hammering the limiter does not extend the
//! lockout.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Configuration for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum actions allowed in the time window.
    pub max_actions: u32,
    /// Time window for counting actions.
    pub window: Duration,
}

impl RateLimitConfig {
    /// Create a new rate limit configuration.
    pub fn new(max_actions: u32, window: Duration) -> Self {
        Self {
            max_actions,
            window,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_actions: 5,
            window: Duration::from_secs(5),
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Action is allowed.
    Allowed,
    /// Action is denied due to rate limit.
    Denied {
        /// Time until the oldest attempt leaves the window.
        retry_after: Duration,
    },
}

impl RateLimitResult {
    /// Check if the action is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }
}

/// Sliding-window rate limiter keyed by user id.
///
/// # Example
///
/// ```
/// use mdstore::rate_limit::{RateLimitConfig, RateLimiter};
/// use std::time::Duration;
/// use uuid::Uuid;
///
/// let limiter = RateLimiter::new(RateLimitConfig::new(2, Duration::from_secs(5)));
/// let user = Uuid::new_v4();
///
/// assert!(limiter.allow(user));
/// assert!(limiter.allow(user));
/// assert!(!limiter.allow(user));
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    /// Timestamps are pushed in non-decreasing order.
    users: Mutex<HashMap<Uuid, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Get the configuration of this limiter.
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Record an attempt for `user` if the window has room.
    ///
    /// Returns `false` without recording anything when the ceiling is reached.
    pub fn allow(&self, user: Uuid) -> bool {
        self.check_and_record(user).is_allowed()
    }

    /// Check and record in one operation.
    ///
    /// Returns `Allowed` and records the attempt, or returns `Denied` without recording.
    pub fn check_and_record(&self, user: Uuid) -> RateLimitResult {
        self.check_and_record_at(user, Instant::now())
    }

    fn check_and_record_at(&self, user: Uuid, now: Instant) -> RateLimitResult {
        let mut users = self.lock();
        let attempts = users.entry(user).or_default();

        prune(attempts, now, self.config.window);

        if attempts.len() >= self.config.max_actions as usize {
            let retry_after = attempts
                .front()
                .map(|&oldest| {
                    self.config
                        .window
                        .saturating_sub(now.duration_since(oldest))
                })
                .unwrap_or(self.config.window);
            return RateLimitResult::Denied { retry_after };
        }

        attempts.push_back(now);
        RateLimitResult::Allowed
    }

    /// Get the number of remaining attempts for a user in the current window.
    pub fn remaining(&self, user: Uuid) -> u32 {
        let now = Instant::now();
        let users = self.lock();

        let used = users
            .get(&user)
            .map(|attempts| {
                attempts
                    .iter()
                    .filter(|&&t| now.duration_since(t) <= self.config.window)
                    .count()
            })
            .unwrap_or(0);

        self.config.max_actions.saturating_sub(used as u32)
    }

    /// Drop expired attempts and forget users without recent activity.
    ///
    /// Call this periodically to free memory.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut users = self.lock();

        for attempts in users.values_mut() {
            prune(attempts, now, self.config.window);
        }

        users.retain(|_, attempts| !attempts.is_empty());
    }

    /// Number of users currently tracked.
    pub fn tracked_users(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, VecDeque<Instant>>> {
        // The map stays consistent even if a holder panicked.
        self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Trim attempts older than `window` from the front.
fn prune(attempts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = attempts.front() {
        if now.duration_since(oldest) > window {
            attempts.pop_front();
        } else {
            break;
        }
    }
}
