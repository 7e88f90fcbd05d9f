//! Per-session sliding-window rate limiting.
//!
//! An in-memory tracker: each session keeps the timestamps of its recent
//! messages; a new message is admitted only while fewer than
//! `max_messages` fall inside the window.  Rejected messages never reach
//! the pipeline.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use pal_domain::error::{Error, Result};

pub struct RateLimiter {
    windows: Mutex<HashMap<Uuid, VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject one message for `session_id` under the given
    /// limits.  Admission records the message immediately.
    pub fn check(&self, session_id: Uuid, max_messages: usize, window_secs: u64) -> Result<()> {
        self.check_at(session_id, max_messages, window_secs, Instant::now())
    }

    fn check_at(
        &self,
        session_id: Uuid,
        max_messages: usize,
        window_secs: u64,
        now: Instant,
    ) -> Result<()> {
        let window = Duration::from_secs(window_secs);
        let mut windows = self.windows.lock();
        let entries = windows.entry(session_id).or_default();

        while let Some(front) = entries.front() {
            if now.duration_since(*front) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= max_messages {
            return Err(Error::RateLimited);
        }
        entries.push_back(now);
        Ok(())
    }

    /// Drop sessions whose whole window has expired (background sweep).
    pub fn prune_idle(&self, window_secs: u64) {
        let cutoff = Duration::from_secs(window_secs);
        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|last| now.duration_since(*last) < cutoff)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eleventh_message_in_window_is_rejected() {
        let limiter = RateLimiter::new();
        let session = Uuid::new_v4();
        let start = Instant::now();

        for i in 0..10 {
            limiter
                .check_at(session, 10, 60, start + Duration::from_secs(i))
                .unwrap();
        }
        let err = limiter
            .check_at(session, 10, 60, start + Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited));
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new();
        let session = Uuid::new_v4();
        let start = Instant::now();

        for _ in 0..10 {
            limiter.check_at(session, 10, 60, start).unwrap();
        }
        assert!(limiter.check_at(session, 10, 60, start).is_err());
        // One second past the window, the first ten have expired.
        assert!(limiter
            .check_at(session, 10, 60, start + Duration::from_secs(61))
            .is_ok());
    }

    #[test]
    fn sessions_are_independent() {
        let limiter = RateLimiter::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let start = Instant::now();

        for _ in 0..10 {
            limiter.check_at(a, 10, 60, start).unwrap();
        }
        assert!(limiter.check_at(a, 10, 60, start).is_err());
        assert!(limiter.check_at(b, 10, 60, start).is_ok());
    }
}
