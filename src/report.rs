//! Immutable failure reports for detection-and-recovery cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detection::DetectionResult;
use crate::profiles::{BehaviorConfig, Fingerprint, Profile};
use crate::strategy::StrategyKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalOutcome {
    Success,
    Exhausted,
    Error,
}

/// One application of a strategy within a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingAttempt {
    pub strategy: StrategyKind,
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

/// Deep copy of the profile a report refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub profile_id: String,
    pub fingerprint: Fingerprint,
    pub behavior_config: BehaviorConfig,
}

impl From<&Profile> for ProfileSnapshot {
    fn from(profile: &Profile) -> Self {
        Self {
            profile_id: profile.profile_id.clone(),
            fingerprint: profile.fingerprint.clone(),
            behavior_config: profile.behavior_config.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub report_id: String,
    pub timestamp: DateTime<Utc>,
    pub detection_result: DetectionResult,
    pub profile_used: ProfileSnapshot,
    pub strategies_attempted: Vec<HealingAttempt>,
    pub final_outcome: FinalOutcome,
    pub error_messages: Vec<String>,
}

impl FailureReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Accumulates attempts for one cycle; consumed by [`ReportBuilder::finish`].
#[derive(Debug)]
pub struct ReportBuilder {
    report_id: String,
    timestamp: DateTime<Utc>,
    detection: DetectionResult,
    attempts: Vec<HealingAttempt>,
    errors: Vec<String>,
}

impl ReportBuilder {
    pub fn new(detection: DetectionResult) -> Self {
        Self {
            report_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            detection,
            attempts: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn detection(&self) -> &DetectionResult {
        &self.detection
    }

    pub fn record_attempt(&mut self, strategy: StrategyKind, outcome: AttemptOutcome) {
        self.attempts.push(HealingAttempt {
            strategy,
            timestamp: Utc::now(),
            outcome,
        });
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// `Error` only when at least one attempt ran and every one of them errored.
    pub fn exhausted_outcome(&self) -> FinalOutcome {
        let all_errored = !self.attempts.is_empty()
            && self
                .attempts
                .iter()
                .all(|attempt| attempt.outcome == AttemptOutcome::Error);
        if all_errored {
            FinalOutcome::Error
        } else {
            FinalOutcome::Exhausted
        }
    }

    pub fn finish(self, profile: &Profile, final_outcome: FinalOutcome) -> FailureReport {
        FailureReport {
            report_id: self.report_id,
            timestamp: self.timestamp,
            detection_result: self.detection,
            profile_used: ProfileSnapshot::from(profile),
            strategies_attempted: self.attempts,
            final_outcome,
            error_messages: self.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectionType;
    use crate::profiles::{ProfileGenerator, ProfileType};
    use serde_json::Value;

    fn captcha_detection() -> DetectionResult {
        DetectionResult {
            detected: true,
            detection_type: DetectionType::Captcha,
            confidence: 0.95,
            indicators: vec!["captcha term matched: recaptcha".into()],
            retry_after: None,
        }
    }

    #[test]
    fn wire_format_uses_exact_field_names() {
        let profile = ProfileGenerator::default().generate_profile(ProfileType::Random);
        let mut builder = ReportBuilder::new(captcha_detection());
        builder.record_attempt(StrategyKind::AddDelay, AttemptOutcome::Failure);
        let report = builder.finish(&profile, FinalOutcome::Exhausted);

        let json: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            [
                "detection_result",
                "error_messages",
                "final_outcome",
                "profile_used",
                "report_id",
                "strategies_attempted",
                "timestamp",
            ]
        );
        assert_eq!(json["final_outcome"], "exhausted");
        assert_eq!(json["detection_result"]["detection_type"], "captcha");
        assert!(json["detection_result"].get("retry_after").is_none());
        assert_eq!(json["strategies_attempted"][0]["strategy"], "add_delay");
        assert_eq!(json["strategies_attempted"][0]["outcome"], "failure");
        assert_eq!(
            json["profile_used"].as_object().unwrap().len(),
            3,
            "profile_used carries id, fingerprint and behavior_config only"
        );
    }

    #[test]
    fn all_errors_mean_error_outcome() {
        let mut builder = ReportBuilder::new(captcha_detection());
        assert_eq!(builder.exhausted_outcome(), FinalOutcome::Exhausted);
        builder.record_attempt(StrategyKind::AddDelay, AttemptOutcome::Error);
        builder.record_attempt(StrategyKind::RotateProfile, AttemptOutcome::Error);
        assert_eq!(builder.exhausted_outcome(), FinalOutcome::Error);
        builder.record_attempt(StrategyKind::ResetSession, AttemptOutcome::Failure);
        assert_eq!(builder.exhausted_outcome(), FinalOutcome::Exhausted);
    }
}
