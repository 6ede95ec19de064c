//! # Core Relay Module
//!
//! This module holds the components shared between the two execution
//! contexts of the relay: the upstream feed task and the client-serving
//! loop.
//!
//! ## Core Components:
//!
//! - **`replay_cache`**: A bounded FIFO buffer of raw feed lines. A newly
//!   attached client is brought up to date from a snapshot of this buffer
//!   before live forwarding begins.
//!
//! - **`activity`**: Per-topic last-seen bookkeeping. The serving loop
//!   polls it to decide when a technically-open upstream connection has
//!   gone silent for too long and must be declared dead.
//!
//! - **`relay_state`**: The shared handle tying the two contexts
//!   together: the cache and the attached client's forward channel under
//!   one lock, the activity map under a second, and the atomic failure
//!   and warm-up flags.
//!
//! By declaring and re-exporting these components, the `core` module
//! provides a unified public API for the `servers` crate.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Per-topic last-seen timestamps used for feed liveness decisions.
pub mod activity;
/// The shared state handle between the upstream task and the serving loop.
pub mod relay_state;
/// The bounded FIFO buffer replayed to newly attached clients.
pub mod replay_cache;

// --- Public API Re-exports ---
// Make the primary structs from the core modules directly accessible.
pub use activity::ActivityMonitor;
pub use relay_state::RelayState;
pub use replay_cache::ReplayCache;
