//! Healing statistics.
//!
//! Global detection/success counters plus per-strategy efficacy. The tracker
//! itself is not synchronised; the engine keeps it behind its state lock.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::AttemptOutcome;
use crate::strategy::StrategyKind;

/// Efficacy of one strategy kind across every cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub errors: u64,
}

impl StrategyStats {
    fn record(&mut self, outcome: AttemptOutcome) {
        self.attempts += 1;
        match outcome {
            AttemptOutcome::Success => self.successes += 1,
            AttemptOutcome::Failure => self.failures += 1,
            AttemptOutcome::Error => self.errors += 1,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Point-in-time view returned by `get_statistics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub started_at: DateTime<Utc>,
    pub total_detections: u64,
    pub total_successes: u64,
    pub success_rate: f64,
    pub profiles_tracked: usize,
    pub current_profile_success_rate: f64,
    pub strategies: BTreeMap<StrategyKind, StrategyStats>,
}

#[derive(Debug)]
pub struct StatsTracker {
    started_at: DateTime<Utc>,
    total_detections: u64,
    total_successes: u64,
    strategies: BTreeMap<StrategyKind, StrategyStats>,
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            total_detections: 0,
            total_successes: 0,
            strategies: BTreeMap::new(),
        }
    }

    pub fn record_detection(&mut self) {
        self.total_detections += 1;
    }

    pub fn record_success(&mut self) {
        self.total_successes += 1;
    }

    pub fn record_attempt(&mut self, kind: StrategyKind, outcome: AttemptOutcome) {
        self.strategies.entry(kind).or_default().record(outcome);
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_detections == 0 {
            0.0
        } else {
            (self.total_successes as f64 / self.total_detections as f64).min(1.0)
        }
    }

    pub fn snapshot(&self, profiles_tracked: usize, current_profile_success_rate: f64) -> Statistics {
        Statistics {
            started_at: self.started_at,
            total_detections: self.total_detections,
            total_successes: self.total_successes,
            success_rate: self.success_rate(),
            profiles_tracked,
            current_profile_success_rate,
            strategies: self.strategies.clone(),
        }
    }
}
