//! Supporting services for the healing engine
//!
//! Backoff timing, statistics tracking and lifecycle events.

pub mod events;
pub mod stats;
pub mod timing;

// Re-export commonly used types
pub use events::{
    AttemptEvent, CycleEvent, DetectionEvent, EventDispatcher, EventHandler, HealerEvent,
    LoggingHandler, PruneEvent,
};
pub use stats::{Statistics, StatsTracker, StrategyStats};
pub use timing::BackoffPolicy;
