//! # Bounded Replay Cache
//!
//! A FIFO buffer of the most recent raw feed lines. When a client
//! attaches to the relay it is first brought up to date from a snapshot
//! of this buffer, so it sees recent history immediately instead of
//! waiting for new upstream traffic.
//!
//! ## Design notes:
//!
//! 1.  **Strict FIFO eviction**: at capacity, exactly the single oldest
//!     entry is dropped before the new one is appended. There is no bulk
//!     flush; a full cache always holds the most recent `capacity` lines
//!     in arrival order.
//!
//! 2.  **Warm-up latch**: the cache counts insertions since the last
//!     `clear()`. Once the counter reaches the warm-up threshold the
//!     cache reports itself warmed up and keeps doing so until the next
//!     `clear()`. Eviction does not affect the counter, so a session
//!     cannot "un-warm" by churning at capacity.
//!
//! 3.  **Session hygiene**: the upstream task clears the cache whenever a
//!     new connection opens, so stale lines from a previous session never
//!     leak into a fresh one.
//!
//! The cache itself is a plain single-threaded structure; `RelayState`
//! guards it with its own lock and never holds that lock across I/O.

use std::collections::VecDeque;

/// Bounded FIFO buffer of raw feed lines with a warm-up latch.
#[derive(Debug)]
pub struct ReplayCache {
    entries: VecDeque<String>,
    capacity: usize,
    warm_up_threshold: u64,
    inserted: u64,
}

impl ReplayCache {
    /// Creates an empty cache. `capacity` bounds the buffer length;
    /// `warm_up_threshold` is the insertion count at which the cache
    /// starts reporting itself warmed up.
    pub fn new(capacity: usize, warm_up_threshold: u64) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            warm_up_threshold,
            inserted: 0,
        }
    }

    /// Empties the buffer and resets the insertion counter, which also
    /// resets the warm-up latch.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.inserted = 0;
    }

    /// Appends a line at the tail, evicting the single oldest entry
    /// first when the buffer is at capacity.
    pub fn append(&mut self, message: String) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
        self.inserted = self.inserted.saturating_add(1);
    }

    /// Returns the buffer contents in insertion order as an owned copy,
    /// safe to iterate while the live cache keeps moving.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    /// True once insertions since the last `clear()` reached the warm-up
    /// threshold.
    pub fn is_warmed_up(&self) -> bool {
        self.inserted >= self.warm_up_threshold
    }

    /// Number of lines currently buffered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appended(cache: &mut ReplayCache, lines: &[&str]) {
        for line in lines {
            cache.append(line.to_string());
        }
    }

    #[test]
    fn test_eviction_keeps_most_recent_in_order() {
        let mut cache = ReplayCache::new(3, 2);
        appended(&mut cache, &["a", "b", "c", "d"]);
        assert_eq!(cache.snapshot(), vec!["b", "c", "d"]);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_warm_up_latches_after_threshold() {
        let mut cache = ReplayCache::new(3, 2);
        cache.append("a".to_string());
        assert!(!cache.is_warmed_up());
        cache.append("b".to_string());
        assert!(cache.is_warmed_up());
        // Eviction churn must not reset the latch.
        appended(&mut cache, &["c", "d", "e", "f"]);
        assert!(cache.is_warmed_up());
    }

    #[test]
    fn test_clear_resets_contents_and_latch() {
        let mut cache = ReplayCache::new(3, 2);
        appended(&mut cache, &["a", "b"]);
        assert!(cache.is_warmed_up());
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.is_warmed_up());
        assert_eq!(cache.snapshot(), Vec::<String>::new());
    }

    #[test]
    fn test_snapshot_is_a_point_in_time_copy() {
        let mut cache = ReplayCache::new(5, 100);
        appended(&mut cache, &["x", "y"]);
        let snap = cache.snapshot();
        cache.append("z".to_string());
        assert_eq!(snap, vec!["x", "y"]);
        assert_eq!(cache.snapshot(), vec!["x", "y", "z"]);
    }
}
