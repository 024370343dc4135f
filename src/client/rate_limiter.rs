//! Global request spacing for the catalog API.
//!
//! Invariants:
//! - Consecutive grants are at least `min_interval` apart, across all workers
//! - Grants are issued one at a time; waiters queue on a fair (FIFO) mutex
//! - A server-requested pause delays every grant until it elapses
//! - `acquire` never fails, it only waits

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Process-wide rate limiter shared by every worker.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    /// Time of the previous grant; held across the wait so grants serialize
    last_grant: tokio::sync::Mutex<Option<Instant>>,
    /// No grant before this instant (set after a 429 with Retry-After)
    paused_until: Mutex<Option<Instant>>,
    total_grants: AtomicU64,
    total_pauses: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter enforcing `min_interval` between grants.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_grant: tokio::sync::Mutex::new(None),
            paused_until: Mutex::new(None),
            total_grants: AtomicU64::new(0),
            total_pauses: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
        }
    }

    /// Wait for the next request slot.
    ///
    /// Returns the instant the slot was granted.
    pub async fn acquire(&self) -> Instant {
        let mut last_grant = self.last_grant.lock().await;
        let started = Instant::now();

        loop {
            let mut ready_at = last_grant.map_or(started, |t| t + self.min_interval);
            if let Some(paused) = self.paused_until() {
                ready_at = ready_at.max(paused);
            }

            let now = Instant::now();
            if ready_at <= now {
                *last_grant = Some(now);
                break;
            }

            debug!(wait_ms = (ready_at - now).as_millis() as u64, "Waiting for rate limit slot");
            tokio::time::sleep_until(ready_at).await;
        }

        let granted = Instant::now();
        self.total_grants.fetch_add(1, Ordering::Relaxed);
        self.total_wait_ms
            .fetch_add((granted - started).as_millis() as u64, Ordering::Relaxed);
        granted
    }

    /// Hold back every grant for `delay` from now.
    ///
    /// An existing longer pause is kept.
    pub fn pause_for(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut paused = match self.paused_until.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if paused.is_none_or(|current| current < until) {
            *paused = Some(until);
            self.total_pauses.fetch_add(1, Ordering::Relaxed);
            warn!(pause_ms = delay.as_millis() as u64, "Server asked to slow down, pausing all requests");
        }
    }

    fn paused_until(&self) -> Option<Instant> {
        let paused = match self.paused_until.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        paused.filter(|t| *t > Instant::now())
    }

    /// Get statistics.
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_grants: self.total_grants.load(Ordering::Relaxed),
            total_pauses: self.total_pauses.load(Ordering::Relaxed),
            total_wait_secs: self.total_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_grants: u64,
    pub total_pauses: u64,
    pub total_wait_secs: f64,
}
