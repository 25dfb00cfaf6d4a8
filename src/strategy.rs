//! Recovery strategies and their ordering.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Closed set of recovery actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    AddDelay,
    ChangeBehavior,
    ChangeFingerprint,
    RotateProfile,
    ResetSession,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::AddDelay,
        StrategyKind::ChangeBehavior,
        StrategyKind::ChangeFingerprint,
        StrategyKind::RotateProfile,
        StrategyKind::ResetSession,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::AddDelay => "add_delay",
            StrategyKind::ChangeBehavior => "change_behavior",
            StrategyKind::ChangeFingerprint => "change_fingerprint",
            StrategyKind::RotateProfile => "rotate_profile",
            StrategyKind::ResetSession => "reset_session",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strategy entry; lower `priority` is tried first by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub kind: StrategyKind,
    pub priority: u32,
}

impl Strategy {
    pub fn new(kind: StrategyKind, priority: u32) -> Self {
        Self { kind, priority }
    }

    /// Default ladder, cheapest action first.
    pub fn default_set() -> Vec<Strategy> {
        StrategyKind::ALL
            .into_iter()
            .zip(1..)
            .map(|(kind, priority)| Strategy::new(kind, priority))
            .collect()
    }
}

/// Injectable ordering over strategies.
pub type StrategyComparator = Arc<dyn Fn(&Strategy, &Strategy) -> Ordering + Send + Sync>;

pub fn by_priority() -> StrategyComparator {
    Arc::new(|a: &Strategy, b: &Strategy| a.priority.cmp(&b.priority))
}

/// Sort with `comparator` (stable) and keep only the first entry of each kind.
pub fn ordered(strategies: &[Strategy], comparator: &StrategyComparator) -> Vec<Strategy> {
    let mut sorted = strategies.to_vec();
    sorted.sort_by(|a, b| comparator(a, b));

    let mut seen = Vec::with_capacity(sorted.len());
    sorted.retain(|strategy| {
        if seen.contains(&strategy.kind) {
            false
        } else {
            seen.push(strategy.kind);
            true
        }
    });
    sorted
}
