//! # Activity Monitor
//!
//! Last-seen bookkeeping for a fixed set of feed topics. A topic here is
//! purely a liveness signal: a name whose presence in message text proves
//! the upstream link is still delivering that kind of traffic. The
//! serving loop compares the oldest stamp against the configured silent
//! limit to decide when a stalled-but-open connection must be treated as
//! dead.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks the last time each configured topic was seen in feed traffic.
///
/// The key set is fixed at construction; `record` calls for names outside
/// it are ignored.
#[derive(Debug)]
pub struct ActivityMonitor {
    stamps: HashMap<String, Instant>,
}

impl ActivityMonitor {
    /// Creates a monitor for the given topics, all stamped to "now".
    pub fn new(topics: &[String]) -> Self {
        let now = Instant::now();
        Self {
            stamps: topics.iter().map(|t| (t.clone(), now)).collect(),
        }
    }

    /// Restamps every tracked topic to "now". Called once per new
    /// upstream connection so a fresh session starts with a clean slate.
    pub fn reset(&mut self) {
        let now = Instant::now();
        for stamp in self.stamps.values_mut() {
            *stamp = now;
        }
    }

    /// Stamps one tracked topic to "now".
    pub fn record(&mut self, topic: &str) {
        if let Some(stamp) = self.stamps.get_mut(topic) {
            *stamp = Instant::now();
        }
    }

    /// The minimum stamp across all tracked topics, or "now" when the
    /// topic set is empty.
    pub fn oldest_timestamp(&self) -> Instant {
        self.stamps
            .values()
            .min()
            .copied()
            .unwrap_or_else(Instant::now)
    }

    /// Time elapsed since the quietest topic was last seen.
    pub fn silence(&self) -> Duration {
        self.oldest_timestamp().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_record_moves_only_the_named_topic() {
        let mut monitor = ActivityMonitor::new(&topics(&["ticker", "depth"]));
        sleep(Duration::from_millis(15));
        monitor.record("ticker");
        // "depth" still carries the construction stamp, so it is the oldest.
        assert!(monitor.silence() >= Duration::from_millis(15));
        monitor.record("depth");
        assert!(monitor.silence() < Duration::from_millis(15));
    }

    #[test]
    fn test_unknown_topic_is_ignored() {
        let mut monitor = ActivityMonitor::new(&topics(&["ticker"]));
        let before = monitor.oldest_timestamp();
        monitor.record("book");
        assert_eq!(monitor.oldest_timestamp(), before);
    }

    #[test]
    fn test_reset_restamps_everything() {
        let mut monitor = ActivityMonitor::new(&topics(&["ticker", "depth"]));
        sleep(Duration::from_millis(15));
        monitor.reset();
        assert!(monitor.silence() < Duration::from_millis(15));
    }

    #[test]
    fn test_empty_topic_set_never_looks_silent() {
        let monitor = ActivityMonitor::new(&[]);
        sleep(Duration::from_millis(5));
        assert!(monitor.silence() < Duration::from_millis(5));
    }
}
