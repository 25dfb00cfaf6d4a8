//! # stealth-healer
//!
//! Adaptive anti-bot detection and recovery for browser automation.
//!
//! The engine classifies a scraped response (captcha, rate limit, IP block or
//! JavaScript challenge), then walks an ordered ladder of recovery strategies
//! against a pool of synthetic browser profiles until a retry comes back clean.
//! Every healing cycle produces an immutable, JSON-serializable report.
//!
//! ## Features
//!
//! - Confidence-scored detection from status, headers, URL and visible text
//! - Fingerprint and behaviour profile synthesis with success tracking
//! - Priority-ordered strategies with backoff and `Retry-After` support
//! - Cancellable healing cycles safe to share across tasks
//!
//! ## Example
//!
//! ```no_run
//! use stealth_healer::{BoxError, CapturedResponse, Healer, Profile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let healer = Healer::new()?;
//!     let blocked = CapturedResponse::new("Too many requests", 429);
//!
//!     let retry = |profile: Profile| async move {
//!         println!("retrying as {}", profile.fingerprint.user_agent);
//!         Ok::<_, BoxError>(CapturedResponse::new("<html>ok</html>", 200))
//!     };
//!
//!     let outcome = healer.check_and_heal(&blocked.view(), Some(&retry)).await;
//!     if let Some(report) = outcome.report {
//!         println!("{}", report.to_json_pretty()?);
//!     }
//!     Ok(())
//! }
//! ```

mod healer;

pub mod detection;
pub mod modules;
pub mod profiles;
pub mod report;
pub mod strategy;

pub use crate::healer::{
    BoxError,
    ConfigError,
    HealOutcome,
    Healer,
    HealerBuilder,
    HealerConfig,
    HealerError,
    HealerResult,
    RetryAction,
    StrategyError,
};

pub use crate::detection::{
    ACCEPTANCE_THRESHOLD,
    CapturedResponse,
    DetectionParseError,
    DetectionResult,
    DetectionType,
    Detector,
    ResponseView,
};

pub use crate::profiles::{
    BehaviorConfig,
    DEFAULT_MIN_SAMPLE_SIZE,
    Fingerprint,
    Profile,
    ProfileGenerator,
    ProfileType,
    ScreenSize,
    ScrollPattern,
    ValueRange,
};

pub use crate::report::{
    AttemptOutcome,
    FailureReport,
    FinalOutcome,
    HealingAttempt,
    ProfileSnapshot,
    ReportBuilder,
};

pub use crate::strategy::{Strategy, StrategyComparator, StrategyKind};

pub use crate::modules::{
    BackoffPolicy,
    EventDispatcher,
    EventHandler,
    HealerEvent,
    LoggingHandler,
    Statistics,
    StatsTracker,
    StrategyStats,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
