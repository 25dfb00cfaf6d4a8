//! Healing lifecycle events.
//!
//! Handlers observe detections, attempts and cycle results without touching
//! engine state. The default dispatcher only carries the logging handler.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::detection::DetectionType;
use crate::report::{AttemptOutcome, FinalOutcome};
use crate::strategy::StrategyKind;

#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub detection_type: DetectionType,
    pub confidence: f32,
    pub profile_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AttemptEvent {
    pub attempt: u32,
    pub strategy: StrategyKind,
    pub outcome: AttemptOutcome,
    pub profile_id: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CycleEvent {
    pub report_id: String,
    pub outcome: FinalOutcome,
    pub attempts: usize,
    pub profile_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PruneEvent {
    pub removed: usize,
    pub threshold: f64,
    pub remaining: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum HealerEvent {
    Detection(DetectionEvent),
    Attempt(AttemptEvent),
    CycleFinished(CycleEvent),
    Pruned(PruneEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &HealerEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: HealerEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &HealerEvent) {
        match event {
            HealerEvent::Detection(detection) => {
                log::warn!(
                    "{} detected (confidence {:.2}) on profile {}",
                    detection.detection_type.as_str(),
                    detection.confidence,
                    detection.profile_id
                );
            }
            HealerEvent::Attempt(attempt) => match &attempt.error {
                Some(error) => log::warn!(
                    "attempt {} {} failed with error: {}",
                    attempt.attempt,
                    attempt.strategy,
                    error
                ),
                None => log::debug!(
                    "attempt {} {} -> {:?} (profile {})",
                    attempt.attempt,
                    attempt.strategy,
                    attempt.outcome,
                    attempt.profile_id
                ),
            },
            HealerEvent::CycleFinished(cycle) => {
                log::info!(
                    "healing cycle {} finished {:?} after {} attempts",
                    cycle.report_id,
                    cycle.outcome,
                    cycle.attempts
                );
            }
            HealerEvent::Pruned(prune) => {
                log::info!(
                    "pruned {} profiles below {:.2} ({} remaining)",
                    prune.removed,
                    prune.threshold,
                    prune.remaining
                );
            }
        }
    }
}
