//! Sliding-window upload rate limiting.
//!
//! Each client has a log of admitted upload timestamps. On every check the
//! log is pruned to the current window and the upload is admitted only while
//! fewer than `max_events` remain. State lives in memory only, so a restart
//! clears it.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::identity::ClientId;

/// Configuration for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Whether limiting is enforced at all.
    pub enabled: bool,
    /// Maximum events admitted in the window.
    pub max_events: u32,
    /// Width of the sliding window.
    pub window: Duration,
}

impl RateLimitConfig {
    /// Create an enabled configuration.
    pub fn new(max_events: u32, window_secs: u64) -> Self {
        Self {
            enabled: true,
            max_events,
            window: Duration::from_secs(window_secs),
        }
    }

    /// The same configuration with enforcement switched off.
    pub fn disabled(self) -> Self {
        Self {
            enabled: false,
            ..self
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(10, 60)
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Event admitted and recorded.
    Allowed,
    /// Event denied; nothing recorded.
    Denied {
        /// Time until the oldest event leaves the window.
        retry_after: Duration,
    },
}

impl RateLimitResult {
    /// Check if the event was admitted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }
}

/// Admitted event timestamps for one client, oldest first.
#[derive(Debug, Default)]
struct EventLog {
    timestamps: Vec<Instant>,
}

impl EventLog {
    /// Drop events at or beyond the window edge.
    fn prune(&mut self, now: Instant, window: Duration) {
        self.timestamps
            .retain(|&t| now.saturating_duration_since(t) < window);
    }

    fn retry_after(&self, now: Instant, window: Duration) -> Duration {
        self.timestamps
            .first()
            .map(|&oldest| window.saturating_sub(now.saturating_duration_since(oldest)))
            .unwrap_or(Duration::ZERO)
    }
}

/// Per-client sliding-window limiter.
///
/// A single mutex guards the table; it is held only for the in-memory
/// prune/count/append, never across I/O.
///
/// # Example
///
/// ```
/// use coursedrop::identity::ClientId;
/// use coursedrop::rate_limit::{RateLimitConfig, UploadRateLimiter};
/// use std::time::Instant;
///
/// let limiter = UploadRateLimiter::new(RateLimitConfig::new(2, 60));
/// let alice = ClientId::parse("alice").unwrap();
/// let now = Instant::now();
///
/// assert!(limiter.admit(&alice, now).is_allowed());
/// assert!(limiter.admit(&alice, now).is_allowed());
/// assert!(!limiter.admit(&alice, now).is_allowed());
/// ```
#[derive(Debug)]
pub struct UploadRateLimiter {
    config: RateLimitConfig,
    clients: Mutex<HashMap<ClientId, EventLog>>,
}

impl UploadRateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Check and record in one step.
    ///
    /// Prunes events older than `now - window`, admits iff fewer than
    /// `max_events` remain, and records `now` only when admitted.
    pub fn admit(&self, client: &ClientId, now: Instant) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::Allowed;
        }

        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let log = clients.entry(client.clone()).or_default();
        log.prune(now, self.config.window);

        if log.timestamps.len() >= self.config.max_events as usize {
            return RateLimitResult::Denied {
                retry_after: log.retry_after(now, self.config.window),
            };
        }

        log.timestamps.push(now);
        RateLimitResult::Allowed
    }

    /// Prune every client's log and forget clients with no recent events.
    ///
    /// Logs are otherwise pruned lazily on the owning client's next upload.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        for log in clients.values_mut() {
            log.prune(now, self.config.window);
        }
        let before = clients.len();
        clients.retain(|_, log| !log.timestamps.is_empty());
        before - clients.len()
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
