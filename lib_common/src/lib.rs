// Declare the modules to re-export
#[cfg(feature = "core")]
pub mod core;

// Re-export everything
#[cfg(feature = "core")]
pub use crate::core::activity::ActivityMonitor;
#[cfg(feature = "core")]
pub use crate::core::relay_state::RelayState;
#[cfg(feature = "core")]
pub use crate::core::replay_cache::ReplayCache;
