use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use http::header::{HeaderValue, RETRY_AFTER};
use stealth_healer::{
    AttemptOutcome, BoxError, CapturedResponse, ConfigError, DetectionType, EventHandler,
    FinalOutcome, HealerError, Healer, HealerBuilder, Profile, ResponseView, RetryAction,
    Strategy, StrategyKind,
    modules::HealerEvent,
};
use tokio::sync::Notify;
use url::Url;

const RECAPTCHA_PAGE: &str = r#"<html><head><script src="https://www.google.com/recaptcha/api.js"></script></head>
<body><form><div class="g-recaptcha" data-sitekey="abc"></div></form></body></html>"#;

fn fast() -> HealerBuilder {
    Healer::builder().with_delay(Duration::from_millis(1), Duration::from_millis(4))
}

fn ok_page() -> CapturedResponse {
    CapturedResponse::new("<html><body><h1>Products</h1><p>42 results</p></body></html>", 200)
}

#[test]
fn rate_limit_status_always_wins() {
    let healer = Healer::new().unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));

    for body in ["", "plain page", RECAPTCHA_PAGE, "Access denied"] {
        let result = healer.detector().detect(&ResponseView::new(body, 429, &headers));
        assert!(result.detected);
        assert_eq!(result.detection_type, DetectionType::RateLimit, "body: {body}");
        assert!(result.confidence >= 0.5);
        assert_eq!(result.retry_after, Some(Duration::from_secs(30)));
    }
}

#[test]
fn recaptcha_page_is_a_captcha() {
    let healer = Healer::new().unwrap();
    let headers = HeaderMap::new();
    let result = healer
        .detector()
        .detect(&ResponseView::new(RECAPTCHA_PAGE, 200, &headers));

    assert_eq!(result.detection_type, DetectionType::Captcha);
    assert!(result.confidence >= 0.9);
    assert!(result.indicators.iter().any(|i| i.contains("recaptcha")));
}

#[test]
fn captcha_url_is_a_signal() {
    let healer = Healer::new().unwrap();
    let headers = HeaderMap::new();
    let url = Url::parse("https://shop.example/sorry/captcha?continue=/").unwrap();
    let result = healer
        .detector()
        .detect(&ResponseView::new("<p>One moment</p>", 200, &headers).with_url(&url));

    assert_eq!(result.detection_type, DetectionType::Captcha);
}

#[test]
fn forbidden_with_block_phrase_is_an_ip_block() {
    let healer = Healer::new().unwrap();
    let headers = HeaderMap::new();
    let result = healer.detector().detect(&ResponseView::new(
        "<h1>Access denied</h1><p>Your IP has been blocked.</p>",
        403,
        &headers,
    ));

    assert_eq!(result.detection_type, DetectionType::IpBlock);
    assert!(result.confidence >= 0.9);
}

#[tokio::test]
async fn benign_response_changes_nothing() {
    let healer = Healer::new().unwrap();
    let before = healer.get_statistics();
    let response = ok_page();

    let outcome = healer.check_and_heal(&response.view(), None).await;

    assert!(outcome.success);
    assert!(outcome.report.is_none());
    let after = healer.get_statistics();
    assert_eq!(after.total_detections, before.total_detections);
    assert_eq!(after.total_successes, before.total_successes);
    assert!(after.strategies.is_empty());
}

#[tokio::test]
async fn persistent_block_exhausts_retry_budget() {
    let healer = fast().with_max_retries(3).build().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let action = {
        let calls = Arc::clone(&calls);
        move |_profile: Profile| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BoxError>(CapturedResponse::new("Access denied", 403)) }
        }
    };
    let blocked = CapturedResponse::new("Access denied", 403);

    let outcome = healer.check_and_heal(&blocked.view(), Some(&action)).await;
    let report = outcome.report.expect("report");

    assert!(!outcome.success);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.strategies_attempted.len(), 3);
    assert!(
        report
            .strategies_attempted
            .iter()
            .all(|attempt| attempt.outcome == AttemptOutcome::Failure)
    );
    assert_eq!(report.final_outcome, FinalOutcome::Exhausted);
    assert_eq!(report.detection_result.detection_type, DetectionType::IpBlock);
    assert_eq!(report.profile_used.profile_id, outcome.profile.profile_id);
}

#[tokio::test]
async fn rotation_recovers_and_updates_statistics() {
    let healer = fast()
        .with_strategies([
            Strategy::new(StrategyKind::RotateProfile, 1),
            Strategy::new(StrategyKind::ResetSession, 2),
        ])
        .build()
        .unwrap();
    let before = healer.get_current_profile();
    let action = |_profile: Profile| async { Ok::<_, BoxError>(ok_page()) };
    let blocked = CapturedResponse::new(RECAPTCHA_PAGE, 200);

    let outcome = healer.check_and_heal(&blocked.view(), Some(&action)).await;

    assert!(outcome.success);
    assert_ne!(outcome.profile.profile_id, before.profile_id);
    assert_eq!(outcome.profile.success_count, 1);

    let stats = healer.get_statistics();
    assert_eq!(stats.total_detections, 1);
    assert_eq!(stats.total_successes, 1);
    assert_eq!(stats.current_profile_success_rate, 1.0);
    assert_eq!(stats.strategies[&StrategyKind::RotateProfile].successes, 1);
    assert!(stats.profiles_tracked >= 2);
}

#[tokio::test]
async fn report_serializes_with_wire_names() {
    let healer = fast().with_max_retries(1).build().unwrap();
    let blocked = CapturedResponse::new("Too many requests", 429);

    let outcome = healer.check_and_heal(&blocked.view(), None).await;
    let json: serde_json::Value =
        serde_json::from_str(&outcome.report.expect("report").to_json().unwrap()).unwrap();

    assert_eq!(json["detection_result"]["detection_type"], "rate_limit");
    assert_eq!(json["strategies_attempted"][0]["strategy"], "add_delay");
    assert_eq!(json["final_outcome"], "exhausted");
    assert!(json["profile_used"]["fingerprint"]["user_agent"].is_string());
}

#[tokio::test]
async fn concurrent_cycles_share_one_engine() {
    let healer = Arc::new(fast().build().unwrap());
    let mut handles = Vec::new();

    for worker in 0..8 {
        let healer = Arc::clone(&healer);
        handles.push(tokio::spawn(async move {
            let blocked = CapturedResponse::new(RECAPTCHA_PAGE, 200);
            let action = move |_profile: Profile| async move {
                if worker % 2 == 0 {
                    Ok::<_, BoxError>(ok_page())
                } else {
                    Ok(CapturedResponse::new(RECAPTCHA_PAGE, 200))
                }
            };
            healer.check_and_heal(&blocked.view(), Some(&action)).await.success
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }

    let stats = healer.get_statistics();
    assert_eq!(successes, 4);
    assert_eq!(stats.total_detections, 8);
    assert_eq!(stats.total_successes, 4);
    assert!((0.0..=1.0).contains(&stats.success_rate));
    let attempts: u64 = stats.strategies.values().map(|s| s.attempts).sum();
    assert_eq!(attempts, 4 + 4 * 3);
}

#[derive(Default)]
struct Recorder {
    events: std::sync::Mutex<Vec<&'static str>>,
}

impl EventHandler for Recorder {
    fn handle(&self, event: &HealerEvent) {
        let name = match event {
            HealerEvent::Detection(_) => "detection",
            HealerEvent::Attempt(_) => "attempt",
            HealerEvent::CycleFinished(_) => "cycle",
            HealerEvent::Pruned(_) => "pruned",
        };
        self.events.lock().unwrap().push(name);
    }
}

#[tokio::test]
async fn handlers_observe_the_cycle() {
    let recorder = Arc::new(Recorder::default());
    let healer = fast()
        .with_max_retries(2)
        .with_event_handler(recorder.clone())
        .build()
        .unwrap();
    let blocked = CapturedResponse::new(RECAPTCHA_PAGE, 200);
    let action = |_profile: Profile| async { Ok::<_, BoxError>(CapturedResponse::new(RECAPTCHA_PAGE, 200)) };

    healer.check_and_heal(&blocked.view(), Some(&action)).await;

    assert_eq!(
        *recorder.events.lock().unwrap(),
        ["detection", "attempt", "attempt", "cycle"]
    );
}

#[tokio::test]
async fn cycle_timeout_bounds_a_long_delay() {
    let healer = Healer::builder()
        .with_delay(Duration::from_secs(30), Duration::from_secs(30))
        .with_cycle_timeout(Duration::from_millis(20))
        .build()
        .unwrap();
    let blocked = CapturedResponse::new("Too many requests", 429);
    let action = |_profile: Profile| async { Ok::<_, BoxError>(ok_page()) };

    let started = std::time::Instant::now();
    let outcome = healer.check_and_heal(&blocked.view(), Some(&action)).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!outcome.success);
    let report = outcome.report.expect("report");
    assert!(report.error_messages.iter().any(|m| m.contains("cancelled")));
}

#[test]
fn invalid_configuration_is_rejected_at_build() {
    let err = Healer::builder().with_min_sample_size(0).build().err().expect("error");
    assert!(matches!(err, HealerError::Config(ConfigError::ZeroSampleSize)));

    let err = Healer::builder()
        .with_prune_threshold(-0.1)
        .build()
        .err()
        .expect("error");
    assert!(matches!(err, HealerError::Config(ConfigError::ThresholdOutOfRange(_))));
}

#[tokio::test]
async fn explicit_pruning_drops_weak_profiles() {
    let healer = fast()
        .with_min_sample_size(1)
        .with_max_retries(1)
        .with_strategies([Strategy::new(StrategyKind::ChangeBehavior, 1)])
        .build()
        .unwrap();
    let blocked = CapturedResponse::new(RECAPTCHA_PAGE, 200);
    let action = |_profile: Profile| async { Ok::<_, BoxError>(CapturedResponse::new(RECAPTCHA_PAGE, 200)) };

    let outcome = healer.check_and_heal(&blocked.view(), Some(&action)).await;
    let weak = outcome.profile;
    assert_eq!(weak.failure_count, 1);

    assert_eq!(healer.remove_failed_profiles(0.3), 1);
    assert!(healer.profile(&weak.profile_id).is_none());
    assert_ne!(healer.get_current_profile().profile_id, weak.profile_id);
}

/// Holds the retry open until released, signalling once it is running.
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl RetryAction for Gate {
    async fn retry(&self, _profile: Profile) -> Result<CapturedResponse, BoxError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ok_page())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_stays_usable_while_an_action_runs() {
    let healer = Arc::new(fast().build().unwrap());
    let gate = Arc::new(Gate::default());

    let cycle = {
        let healer = Arc::clone(&healer);
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            let blocked = CapturedResponse::new(RECAPTCHA_PAGE, 200);
            healer.check_and_heal(&blocked.view(), Some(&*gate)).await
        })
    };

    gate.entered.notified().await;

    let stats = healer.get_statistics();
    assert_eq!(stats.total_detections, 1);
    assert_eq!(stats.total_successes, 0);

    let page = ok_page();
    let benign = tokio::time::timeout(
        Duration::from_secs(5),
        healer.check_and_heal(&page.view(), None),
    )
    .await
    .expect("benign check finished while the action was parked");
    assert!(benign.success);
    assert!(benign.report.is_none());

    gate.release.notify_one();
    let outcome = cycle.await.unwrap();
    assert!(outcome.success);
    assert_eq!(healer.get_statistics().total_successes, 1);
}

#[tokio::test]
async fn without_action_the_full_ladder_is_recorded() {
    let healer = fast().with_max_retries(3).build().unwrap();
    let blocked = CapturedResponse::new(RECAPTCHA_PAGE, 200);

    let outcome = healer.check_and_heal(&blocked.view(), None).await;
    let report = outcome.report.expect("report");

    assert!(!outcome.success);
    assert_eq!(report.strategies_attempted.len(), 3);
    assert!(
        report
            .strategies_attempted
            .iter()
            .all(|attempt| attempt.outcome == AttemptOutcome::Failure)
    );
    assert_eq!(report.final_outcome, FinalOutcome::Exhausted);
    assert_eq!(healer.healing_history().len(), 1);
}
