//! Per-worker fetch pacer
//!
//! A token-bucket-style gate with a bucket depth of one: each network fetch
//! reserves the next allowed slot `interval` after the previous one. Owned
//! by exactly one worker, so there is no locking; a zero interval disables
//! pacing.

use std::time::Duration;
use tokio::time::Instant;

pub struct RateGate {
    interval: Duration,
    next_allowed: Instant,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_allowed: Instant::now(),
        }
    }

    /// Sleep until the next allowed slot, then reserve the one after it.
    pub async fn wait(&mut self) {
        if self.interval.is_zero() {
            return;
        }

        let mut now = Instant::now();
        if now < self.next_allowed {
            tokio::time::sleep_until(self.next_allowed).await;
            now = Instant::now();
        }

        // max() avoids bunching when we fell behind the schedule.
        self.next_allowed = now.max(self.next_allowed) + self.interval;
    }
}
