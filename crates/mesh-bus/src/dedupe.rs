//! # Time-Bounded Delivery Cache
//!
//! Idempotency hint for at-least-once delivery: remembers recently seen
//! `message_id`s so a redelivered envelope inside the window is dropped
//! before any handler runs.
//!
//! - Ids are remembered for `window` after first sight
//! - Expired ids are garbage-collected every `gc_interval`
//! - Memory is bounded by the message rate times the window

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Time-bounded set of recently delivered message ids.
pub struct TimeBoundedIdCache {
    /// Map of message id -> time first seen.
    seen: HashMap<String, Instant>,

    /// How long an id is remembered.
    window: Duration,

    /// Last garbage collection.
    last_gc: Instant,

    /// Garbage collection interval.
    gc_interval: Duration,
}

impl TimeBoundedIdCache {
    /// Default garbage collection interval.
    pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10);

    /// Create a cache remembering ids for `window`.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self::with_config(window, Self::DEFAULT_GC_INTERVAL.min(window))
    }

    /// Create a cache with a custom GC interval.
    #[must_use]
    pub fn with_config(window: Duration, gc_interval: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            window,
            last_gc: Instant::now(),
            gc_interval,
        }
    }

    /// Record `message_id`; returns `false` if it was already seen within the window.
    pub fn check_and_insert(&mut self, message_id: &str) -> bool {
        self.check_and_insert_at(message_id, Instant::now())
    }

    /// [`check_and_insert`](Self::check_and_insert) at an explicit instant.
    pub fn check_and_insert_at(&mut self, message_id: &str, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_gc) >= self.gc_interval {
            self.garbage_collect(now);
            self.last_gc = now;
        }

        match self.seen.get(message_id) {
            Some(first_seen) if now.saturating_duration_since(*first_seen) < self.window => false,
            _ => {
                self.seen.insert(message_id.to_string(), now);
                true
            }
        }
    }

    /// Remove ids older than the window.
    pub fn garbage_collect(&mut self, now: Instant) {
        let window = self.window;
        self.seen
            .retain(|_, first_seen| now.saturating_duration_since(*first_seen) < window);
    }

    /// Number of ids currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
