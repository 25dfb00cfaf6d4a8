//! Healing engine orchestration.
//!
//! Wires the detector, profile pool, backoff policy and statistics together
//! behind a single engine-wide lock. The lock is only ever held for map reads
//! and counter updates; delays and retry actions run without it.

use std::future::Future;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::detection::{CapturedResponse, Detector, ResponseView};
use crate::modules::events::{
    AttemptEvent, CycleEvent, DetectionEvent, EventDispatcher, EventHandler, HealerEvent,
    LoggingHandler, PruneEvent,
};
use crate::modules::stats::{Statistics, StatsTracker};
use crate::modules::timing::BackoffPolicy;
use crate::profiles::{DEFAULT_MIN_SAMPLE_SIZE, Profile, ProfileGenerator, ProfileType};
use crate::report::{AttemptOutcome, FailureReport, FinalOutcome, ReportBuilder};
use crate::strategy::{self, Strategy, StrategyComparator, StrategyKind};

/// Result alias used by engine construction.
pub type HealerResult<T> = Result<T, HealerError>;

/// Longest single sleep; longer backoff waits are capped here.
const MAX_WAIT: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Error type retry actions may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum HealerError {
    #[error("invalid healer configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Construction-time misconfiguration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_retries must be at least 1")]
    ZeroRetries,
    #[error("prune threshold {0} is outside [0, 1]")]
    ThresholdOutOfRange(f64),
    #[error("min_sample_size must be at least 1")]
    ZeroSampleSize,
    #[error("at least one strategy is required")]
    NoStrategies,
    #[error("delay base {base:?} exceeds delay max {max:?}")]
    InvalidDelayBounds { base: Duration, max: Duration },
}

/// Failure while applying one strategy. Recorded in the report, never raised.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("profile {0} is no longer in the pool")]
    ProfileMissing(String),
    #[error("retry action failed: {0}")]
    Action(String),
    #[error("retry action panicked: {0}")]
    ActionPanicked(String),
}

/// Caller-supplied hook that replays the scrape with the given profile.
#[async_trait]
pub trait RetryAction: Send + Sync {
    async fn retry(&self, profile: Profile) -> Result<CapturedResponse, BoxError>;
}

#[async_trait]
impl<F, Fut> RetryAction for F
where
    F: Fn(Profile) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CapturedResponse, BoxError>> + Send + 'static,
{
    async fn retry(&self, profile: Profile) -> Result<CapturedResponse, BoxError> {
        (self)(profile).await
    }
}

/// Result of one `check_and_heal` call.
#[derive(Debug, Clone)]
pub struct HealOutcome {
    pub success: bool,
    pub profile: Profile,
    pub report: Option<FailureReport>,
}

/// Engine configuration used by the builder.
#[derive(Clone)]
pub struct HealerConfig {
    pub max_retries: u32,
    pub min_sample_size: u32,
    pub prune_threshold: f64,
    pub auto_prune: bool,
    pub default_profile_type: ProfileType,
    pub behavior_profile_type: ProfileType,
    pub delay_base: Duration,
    pub delay_max: Duration,
    pub delay_variance: f64,
    pub cycle_timeout: Option<Duration>,
    pub history_limit: usize,
    pub seed: Option<u64>,
    pub strategies: Vec<Strategy>,
    pub strategy_order: StrategyComparator,
    pub event_handlers: Vec<Arc<dyn EventHandler>>,
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_sample_size: DEFAULT_MIN_SAMPLE_SIZE,
            prune_threshold: 0.3,
            auto_prune: false,
            default_profile_type: ProfileType::Random,
            behavior_profile_type: ProfileType::Conservative,
            delay_base: Duration::from_secs(1),
            delay_max: Duration::from_secs(8),
            delay_variance: 0.25,
            cycle_timeout: None,
            history_limit: 100,
            seed: None,
            strategies: Strategy::default_set(),
            strategy_order: strategy::by_priority(),
            event_handlers: Vec::new(),
        }
    }
}

impl HealerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if !(0.0..=1.0).contains(&self.prune_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.prune_threshold));
        }
        if self.min_sample_size == 0 {
            return Err(ConfigError::ZeroSampleSize);
        }
        if self.strategies.is_empty() {
            return Err(ConfigError::NoStrategies);
        }
        if self.delay_base > self.delay_max {
            return Err(ConfigError::InvalidDelayBounds {
                base: self.delay_base,
                max: self.delay_max,
            });
        }
        Ok(())
    }
}

/// Fluent builder for [`Healer`].
pub struct HealerBuilder {
    config: HealerConfig,
}

impl HealerBuilder {
    pub fn new() -> Self {
        Self {
            config: HealerConfig::default(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn with_min_sample_size(mut self, min_sample_size: u32) -> Self {
        self.config.min_sample_size = min_sample_size;
        self
    }

    pub fn with_prune_threshold(mut self, threshold: f64) -> Self {
        self.config.prune_threshold = threshold;
        self
    }

    pub fn enable_auto_prune(mut self) -> Self {
        self.config.auto_prune = true;
        self
    }

    pub fn with_default_profile_type(mut self, profile_type: ProfileType) -> Self {
        self.config.default_profile_type = profile_type;
        self
    }

    pub fn with_behavior_profile_type(mut self, profile_type: ProfileType) -> Self {
        self.config.behavior_profile_type = profile_type;
        self
    }

    pub fn with_delay(mut self, base: Duration, max: Duration) -> Self {
        self.config.delay_base = base;
        self.config.delay_max = max;
        self
    }

    pub fn with_delay_variance(mut self, variance: f64) -> Self {
        self.config.delay_variance = variance;
        self
    }

    pub fn with_cycle_timeout(mut self, timeout: Duration) -> Self {
        self.config.cycle_timeout = Some(timeout);
        self
    }

    /// Number of finished reports kept in memory; 0 disables the history.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.config.history_limit = limit;
        self
    }

    /// Seed profile synthesis so the same sequence of profiles is produced.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn with_strategies<I>(mut self, strategies: I) -> Self
    where
        I: IntoIterator<Item = Strategy>,
    {
        self.config.strategies = strategies.into_iter().collect();
        self
    }

    pub fn with_strategy_order(mut self, comparator: StrategyComparator) -> Self {
        self.config.strategy_order = comparator;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.config.event_handlers.push(handler);
        self
    }

    pub fn build(self) -> HealerResult<Healer> {
        Healer::with_config(self.config)
    }
}

impl Default for HealerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything guarded by the engine-wide lock.
#[derive(Debug)]
struct HealerState {
    profiles: ProfileGenerator,
    current_profile_id: Option<String>,
    stats: StatsTracker,
    /// Most recent reports, oldest first.
    history: VecDeque<FailureReport>,
}

impl HealerState {
    fn current_profile(&mut self, profile_type: ProfileType) -> Profile {
        if let Some(id) = &self.current_profile_id
            && let Some(profile) = self.profiles.get(id)
        {
            return profile.clone();
        }
        let profile = self.profiles.generate_profile(profile_type);
        self.current_profile_id = Some(profile.profile_id.clone());
        profile
    }

    fn remember(&mut self, report: &FailureReport, limit: usize) {
        if limit == 0 {
            return;
        }
        while self.history.len() >= limit {
            self.history.pop_front();
        }
        self.history.push_back(report.clone());
    }
}

/// Per-call healing state.
struct Cycle {
    report: ReportBuilder,
    active_id: String,
    delay_level: u32,
}

enum Applied {
    Done,
    Interrupted,
}

/// Adaptive detection-and-recovery engine shared by scrape workers.
pub struct Healer {
    config: HealerConfig,
    strategies: Vec<Strategy>,
    detector: Detector,
    backoff: BackoffPolicy,
    events: EventDispatcher,
    state: Mutex<HealerState>,
}

impl Healer {
    /// Construct an engine with default configuration.
    pub fn new() -> HealerResult<Self> {
        Healer::with_config(HealerConfig::default())
    }

    pub fn builder() -> HealerBuilder {
        HealerBuilder::new()
    }

    pub fn with_config(config: HealerConfig) -> HealerResult<Self> {
        config.validate()?;

        let strategies = strategy::ordered(&config.strategies, &config.strategy_order)
            .into_iter()
            .take(config.max_retries as usize)
            .collect();

        let backoff = BackoffPolicy::new(config.delay_base, config.delay_max)
            .with_variance(config.delay_variance);

        let mut events = EventDispatcher::new();
        events.register_handler(Arc::new(LoggingHandler));
        for handler in &config.event_handlers {
            events.register_handler(handler.clone());
        }

        let profiles = match config.seed {
            Some(seed) => ProfileGenerator::seeded(config.min_sample_size, seed),
            None => ProfileGenerator::new(config.min_sample_size),
        };

        let state = HealerState {
            profiles,
            current_profile_id: None,
            stats: StatsTracker::new(),
            history: VecDeque::with_capacity(config.history_limit.min(128)),
        };

        Ok(Self {
            config,
            strategies,
            detector: Detector::new(),
            backoff,
            events,
            state: Mutex::new(state),
        })
    }

    /// Strategies one cycle walks through, in order.
    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    fn state(&self) -> MutexGuard<'_, HealerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut HealerState) -> R) -> R {
        let mut guard = self.state();
        f(&mut guard)
    }

    pub fn get_current_profile(&self) -> Profile {
        let profile_type = self.config.default_profile_type;
        self.update(|state| state.current_profile(profile_type))
    }

    pub fn profile(&self, profile_id: &str) -> Option<Profile> {
        self.update(|state| state.profiles.get(profile_id).cloned())
    }

    pub fn get_statistics(&self) -> Statistics {
        self.update(|state| {
            let current_rate = state
                .current_profile_id
                .as_deref()
                .and_then(|id| state.profiles.get(id))
                .map(Profile::success_rate)
                .unwrap_or(0.0);
            state.stats.snapshot(state.profiles.len(), current_rate)
        })
    }

    /// Reports of the most recent cycles, oldest first.
    pub fn healing_history(&self) -> Vec<FailureReport> {
        self.update(|state| state.history.iter().cloned().collect())
    }

    /// Prune poorly performing profiles; see
    /// [`ProfileGenerator::remove_failed_profiles`].
    pub fn remove_failed_profiles(&self, threshold: f64) -> usize {
        let threshold = threshold.clamp(0.0, 1.0);
        let (removed, remaining) = self.update(|state| {
            let removed = state.profiles.remove_failed_profiles(threshold);
            (removed, state.profiles.len())
        });
        self.dispatch_prune(removed, threshold, remaining);
        removed
    }

    /// Classify `response` and, if it shows an anti-automation signal, run a
    /// healing cycle.
    pub async fn check_and_heal(
        &self,
        response: &ResponseView<'_>,
        action: Option<&dyn RetryAction>,
    ) -> HealOutcome {
        self.check_and_heal_with(response, action, &CancellationToken::new())
            .await
    }

    /// Like [`Healer::check_and_heal`], aborting between attempts (or during a
    /// delay) once `cancel` fires.
    pub async fn check_and_heal_with(
        &self,
        response: &ResponseView<'_>,
        action: Option<&dyn RetryAction>,
        cancel: &CancellationToken,
    ) -> HealOutcome {
        let detection = self.detector.detect(response);
        let profile_type = self.config.default_profile_type;

        if !detection.detected {
            let profile = self.update(|state| state.current_profile(profile_type));
            return HealOutcome {
                success: true,
                profile,
                report: None,
            };
        }

        let profile = self.update(|state| {
            state.stats.record_detection();
            state.current_profile(profile_type)
        });

        self.events.dispatch(HealerEvent::Detection(DetectionEvent {
            detection_type: detection.detection_type,
            confidence: detection.confidence,
            profile_id: profile.profile_id.clone(),
            timestamp: chrono::Utc::now(),
        }));

        let cycle = Cycle {
            report: ReportBuilder::new(detection),
            active_id: profile.profile_id,
            delay_level: 0,
        };

        // A timeout too large to represent is no timeout at all.
        let deadline = self
            .config
            .cycle_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));

        self.heal(cycle, action, cancel, deadline).await
    }

    /// Walk the strategy ladder. Without an action the strategies are still
    /// applied, but nothing can confirm them, so each attempt is a failure.
    async fn heal(
        &self,
        mut cycle: Cycle,
        action: Option<&dyn RetryAction>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> HealOutcome {
        for (index, strategy) in self.strategies.iter().enumerate() {
            let attempt = index as u32 + 1;
            if interrupted(cancel, deadline) {
                cycle
                    .report
                    .record_error(format!("healing cycle cancelled before attempt {attempt}"));
                break;
            }

            let result = match self.apply_strategy(&mut cycle, strategy.kind, cancel, deadline).await {
                Ok(Applied::Done) => match action {
                    Some(action) => self.verify(&cycle, action).await,
                    None => Ok(false),
                },
                Ok(Applied::Interrupted) => {
                    cycle.report.record_error(format!(
                        "healing cycle cancelled during attempt {attempt} ({})",
                        strategy.kind
                    ));
                    break;
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(true) => {
                    self.record_attempt(&mut cycle, attempt, strategy.kind, AttemptOutcome::Success, None);
                    return self.conclude_success(cycle);
                }
                Ok(false) => {
                    self.record_attempt(&mut cycle, attempt, strategy.kind, AttemptOutcome::Failure, None);
                }
                Err(err) => {
                    self.record_attempt(
                        &mut cycle,
                        attempt,
                        strategy.kind,
                        AttemptOutcome::Error,
                        Some(err.to_string()),
                    );
                }
            }
        }

        self.conclude_exhausted(cycle)
    }

    /// Single dispatch point for every strategy kind.
    async fn apply_strategy(
        &self,
        cycle: &mut Cycle,
        kind: StrategyKind,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<Applied, StrategyError> {
        let active = cycle.active_id.clone();
        let next = match kind {
            StrategyKind::AddDelay => {
                cycle.delay_level += 1;
                let wait = self
                    .backoff
                    .delay_for(cycle.delay_level, cycle.report.detection().retry_after);
                log::debug!("waiting {:.2}s before retry", wait.as_secs_f64());
                return Ok(wait_for(wait, cancel, deadline).await);
            }
            StrategyKind::ChangeBehavior => {
                let profile_type = self.config.behavior_profile_type;
                self.update(|state| state.profiles.regenerate_behavior(&active, profile_type))
            }
            StrategyKind::ChangeFingerprint => {
                self.update(|state| state.profiles.regenerate_fingerprint(&active))
            }
            StrategyKind::RotateProfile => {
                self.update(|state| Some(state.profiles.get_best_profile(Some(&active))))
            }
            StrategyKind::ResetSession => {
                cycle.delay_level = 0;
                let profile_type = self.config.default_profile_type;
                self.update(|state| Some(state.profiles.generate_profile(profile_type)))
            }
        };

        let profile = next.ok_or(StrategyError::ProfileMissing(active))?;
        self.update(|state| {
            state.profiles.touch(&profile.profile_id);
            state.current_profile_id = Some(profile.profile_id.clone());
        });
        cycle.active_id = profile.profile_id;
        Ok(Applied::Done)
    }

    /// Replay through the caller's action and report whether the new response
    /// is clean. Runs without the state lock.
    async fn verify(&self, cycle: &Cycle, action: &dyn RetryAction) -> Result<bool, StrategyError> {
        let profile = self
            .profile(&cycle.active_id)
            .ok_or_else(|| StrategyError::ProfileMissing(cycle.active_id.clone()))?;

        let response = match AssertUnwindSafe(action.retry(profile)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(StrategyError::Action(err.to_string())),
            Err(panic) => return Err(StrategyError::ActionPanicked(panic_message(panic.as_ref()))),
        };

        Ok(!self.detector.detect(&response.view()).detected)
    }

    fn record_attempt(
        &self,
        cycle: &mut Cycle,
        attempt: u32,
        kind: StrategyKind,
        outcome: AttemptOutcome,
        error: Option<String>,
    ) {
        cycle.report.record_attempt(kind, outcome);
        if let Some(ref message) = error {
            cycle
                .report
                .record_error(format!("attempt {attempt} ({kind}): {message}"));
        }
        self.update(|state| state.stats.record_attempt(kind, outcome));

        self.events.dispatch(HealerEvent::Attempt(AttemptEvent {
            attempt,
            strategy: kind,
            outcome,
            profile_id: cycle.active_id.clone(),
            error,
            timestamp: chrono::Utc::now(),
        }));
    }

    fn conclude_success(&self, cycle: Cycle) -> HealOutcome {
        let profile_type = self.config.default_profile_type;
        let profile = self.update(|state| {
            state.stats.record_success();
            state
                .profiles
                .record_outcome(&cycle.active_id, true)
                .unwrap_or_else(|| state.current_profile(profile_type))
        });

        let report = cycle.report.finish(&profile, FinalOutcome::Success);
        self.finish_cycle(&report, &profile);
        HealOutcome {
            success: true,
            profile,
            report: Some(report),
        }
    }

    fn conclude_exhausted(&self, cycle: Cycle) -> HealOutcome {
        let profile_type = self.config.default_profile_type;
        let outcome = cycle.report.exhausted_outcome();
        let profile = self.update(|state| {
            state
                .profiles
                .record_outcome(&cycle.active_id, false)
                .unwrap_or_else(|| state.current_profile(profile_type))
        });

        let report = cycle.report.finish(&profile, outcome);
        self.finish_cycle(&report, &profile);
        HealOutcome {
            success: false,
            profile,
            report: Some(report),
        }
    }

    fn finish_cycle(&self, report: &FailureReport, profile: &Profile) {
        self.events.dispatch(HealerEvent::CycleFinished(CycleEvent {
            report_id: report.report_id.clone(),
            outcome: report.final_outcome,
            attempts: report.strategies_attempted.len(),
            profile_id: profile.profile_id.clone(),
            timestamp: chrono::Utc::now(),
        }));

        let limit = self.config.history_limit;
        self.update(|state| state.remember(report, limit));

        if self.config.auto_prune {
            let threshold = self.config.prune_threshold;
            let (removed, remaining) = self.update(|state| {
                let removed = state
                    .profiles
                    .remove_failed_profiles_except(threshold, Some(&profile.profile_id));
                (removed, state.profiles.len())
            });
            if removed > 0 {
                self.dispatch_prune(removed, threshold, remaining);
            }
        }
    }

    fn dispatch_prune(&self, removed: usize, threshold: f64, remaining: usize) {
        self.events.dispatch(HealerEvent::Pruned(PruneEvent {
            removed,
            threshold,
            remaining,
            timestamp: chrono::Utc::now(),
        }));
    }
}

fn interrupted(cancel: &CancellationToken, deadline: Option<Instant>) -> bool {
    cancel.is_cancelled() || deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

async fn wait_for(delay: Duration, cancel: &CancellationToken, deadline: Option<Instant>) -> Applied {
    let target = Instant::now() + delay.min(MAX_WAIT);
    let until = deadline.map_or(target, |deadline| deadline.min(target));

    tokio::select! {
        _ = cancel.cancelled() => Applied::Interrupted,
        _ = sleep_until(until) => {
            if until < target {
                Applied::Interrupted
            } else {
                Applied::Done
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
