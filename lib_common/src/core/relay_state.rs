//! # Shared Relay State
//!
//! The handle shared between the upstream feed task and the
//! client-serving loop. It owns the replay cache together with the
//! attached client's forward channel under one lock, the activity
//! monitor under a second independent lock, and the atomic failure and
//! warm-up flags.
//!
//! ## Locking rules:
//!
//! - The cache lock and the activity lock are never nested; every
//!   operation takes exactly one of them and releases it before
//!   returning, so there is no ordering to reason about.
//! - Neither lock is ever held across an await point or any I/O. The
//!   critical sections are in-memory bookkeeping plus unbounded channel
//!   sends, which never block.
//!
//! Keeping the attached client's sender inside the cache's critical
//! section is what makes replay exact: `attach_client` installs the
//! sender and snapshots the buffer in one section, so every published
//! line lands either in the returned snapshot or in the client's
//! channel, exactly once and in arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::core::activity::ActivityMonitor;
use crate::core::replay_cache::ReplayCache;

/// The replay cache plus the attached client, guarded as one unit.
struct FeedBuffer {
    cache: ReplayCache,
    client: Option<mpsc::UnboundedSender<String>>,
}

/// Shared state handle; clones refer to the same underlying relay.
#[derive(Clone)]
pub struct RelayState {
    feed: Arc<Mutex<FeedBuffer>>,
    activity: Arc<Mutex<ActivityMonitor>>,
    upstream_tx: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    upstream_failed: Arc<AtomicBool>,
    ever_warmed: Arc<AtomicBool>,
}

impl RelayState {
    /// Creates the shared state for one relay run.
    pub fn new(topics: &[String], cache_capacity: usize, warm_up_threshold: u64) -> Self {
        Self {
            feed: Arc::new(Mutex::new(FeedBuffer {
                cache: ReplayCache::new(cache_capacity, warm_up_threshold),
                client: None,
            })),
            activity: Arc::new(Mutex::new(ActivityMonitor::new(topics))),
            upstream_tx: Arc::new(Mutex::new(None)),
            upstream_failed: Arc::new(AtomicBool::new(false)),
            ever_warmed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers the channel the upstream task drains for client input.
    pub fn set_upstream_tx(&self, tx: mpsc::UnboundedSender<String>) {
        let mut guard = self.upstream_tx.lock().expect("upstream tx lock poisoned");
        *guard = Some(tx);
    }

    /// Forwards one raw client line towards the upstream connection.
    /// Best-effort: a missing or closed channel is logged and swallowed;
    /// silence detection, not this call, decides whether the link is dead.
    pub fn send_upstream(&self, line: &str) {
        let guard = self.upstream_tx.lock().expect("upstream tx lock poisoned");
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(line.to_string()).is_err() {
                    log::debug!("Upstream task gone; dropping client line");
                }
            }
            None => log::debug!("Upstream not connected yet; dropping client line"),
        }
    }

    /// Starts a fresh upstream session: empties the cache and restamps
    /// every activity topic. The run-level warm-up verdict is sticky and
    /// survives this.
    pub fn begin_session(&self) {
        {
            let mut feed = self.feed.lock().expect("feed lock poisoned");
            feed.cache.clear();
        }
        let mut activity = self.activity.lock().expect("activity lock poisoned");
        activity.reset();
    }

    /// Appends one feed line to the cache and forwards it to the
    /// attached client, if any. Forwarding is best-effort; a client that
    /// went away mid-send is simply detached.
    pub fn publish(&self, line: &str) {
        let mut feed = self.feed.lock().expect("feed lock poisoned");
        feed.cache.append(line.to_string());
        if feed.cache.is_warmed_up() {
            self.ever_warmed.store(true, Ordering::SeqCst);
        }
        let client_gone = match feed.client.as_ref() {
            Some(client) => client.send(line.to_string()).is_err(),
            None => false,
        };
        if client_gone {
            feed.client = None;
        }
    }

    /// Stamps one liveness topic with the current time.
    pub fn record_activity(&self, topic: &str) {
        let mut activity = self.activity.lock().expect("activity lock poisoned");
        activity.record(topic);
    }

    /// Time since the quietest liveness topic was last seen.
    pub fn silence(&self) -> Duration {
        let activity = self.activity.lock().expect("activity lock poisoned");
        activity.silence()
    }

    /// Attaches a client: installs its forward channel and returns the
    /// cache snapshot to replay, both in one critical section so nothing
    /// published afterwards is missed or duplicated.
    pub fn attach_client(&self, tx: mpsc::UnboundedSender<String>) -> Vec<String> {
        let mut feed = self.feed.lock().expect("feed lock poisoned");
        feed.client = Some(tx);
        feed.cache.snapshot()
    }

    /// Detaches the attached client, if still present.
    pub fn detach_client(&self) {
        let mut feed = self.feed.lock().expect("feed lock poisoned");
        feed.client = None;
    }

    /// Marks the upstream connection as failed for the rest of the run.
    pub fn mark_upstream_failed(&self) {
        self.upstream_failed.store(true, Ordering::SeqCst);
    }

    /// Whether the upstream connection has been declared dead.
    pub fn upstream_failed(&self) -> bool {
        self.upstream_failed.load(Ordering::SeqCst)
    }

    /// Whether the cache reached the warm-up threshold at least once
    /// during this run.
    pub fn had_successful_run(&self) -> bool {
        self.ever_warmed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(capacity: usize, warm_up: u64) -> RelayState {
        RelayState::new(&["ticker".to_string()], capacity, warm_up)
    }

    #[test]
    fn test_attach_replays_backlog_then_forwards_live_lines() {
        let state = state(10, 100);
        state.publish("x");
        state.publish("y");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let backlog = state.attach_client(tx);
        assert_eq!(backlog, vec!["x", "y"]);

        state.publish("z");
        assert_eq!(rx.try_recv().unwrap(), "z");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_lines_before_attach_are_only_in_the_snapshot() {
        let state = state(10, 100);
        state.publish("a");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let backlog = state.attach_client(tx);
        assert_eq!(backlog, vec!["a"]);
        // Nothing was forwarded for lines that predate the attach.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_detach_stops_forwarding() {
        let state = state(10, 100);
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.attach_client(tx);
        state.detach_client();
        state.publish("m");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_client_is_pruned_on_publish() {
        let state = state(10, 100);
        let (tx, rx) = mpsc::unbounded_channel();
        state.attach_client(tx);
        drop(rx);
        state.publish("m");

        // A fresh client attaches cleanly and receives live lines again.
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let backlog = state.attach_client(tx2);
        assert_eq!(backlog, vec!["m"]);
        state.publish("n");
        assert_eq!(rx2.try_recv().unwrap(), "n");
    }

    #[test]
    fn test_warm_up_verdict_is_sticky_across_sessions() {
        let state = state(10, 2);
        assert!(!state.had_successful_run());
        state.publish("a");
        state.publish("b");
        assert!(state.had_successful_run());
        state.begin_session();
        assert!(state.had_successful_run());
    }

    #[test]
    fn test_begin_session_clears_the_backlog() {
        let state = state(10, 100);
        state.publish("old");
        state.begin_session();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(state.attach_client(tx).is_empty());
    }

    #[test]
    fn test_failure_flag_roundtrip() {
        let state = state(10, 100);
        assert!(!state.upstream_failed());
        state.mark_upstream_failed();
        assert!(state.upstream_failed());
    }
}
