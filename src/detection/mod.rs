//! Anti-automation signal detection.
//!
//! Scores every signal family independently and reports the single strongest
//! family above the acceptance threshold.

pub mod response;
pub mod signals;

use std::time::Duration;

use http::header::RETRY_AFTER;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

pub use response::{CapturedResponse, ResponseView};
pub use signals::DetectionParseError;

/// Minimum confidence for a family to be reported.
pub const ACCEPTANCE_THRESHOLD: f32 = 0.5;

/// Visible text above this many characters disqualifies a js-challenge verdict.
const JS_CHALLENGE_MAX_VISIBLE_CHARS: usize = 400;

/// Kind of anti-automation mechanism detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    #[default]
    None,
    Captcha,
    RateLimit,
    IpBlock,
    JsChallenge,
}

impl DetectionType {
    /// Tie-break rank, lower wins.
    fn rank(self) -> u8 {
        match self {
            DetectionType::Captcha => 0,
            DetectionType::IpBlock => 1,
            DetectionType::RateLimit => 2,
            DetectionType::JsChallenge => 3,
            DetectionType::None => u8::MAX,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DetectionType::None => "none",
            DetectionType::Captcha => "captcha",
            DetectionType::RateLimit => "rate_limit",
            DetectionType::IpBlock => "ip_block",
            DetectionType::JsChallenge => "js_challenge",
        }
    }
}

/// Verdict for one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub detection_type: DetectionType,
    pub confidence: f32,
    pub indicators: Vec<String>,
    /// Server-provided wait hint, only set for rate limits.
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl DetectionResult {
    pub fn clean() -> Self {
        Self {
            detected: false,
            detection_type: DetectionType::None,
            confidence: 0.0,
            indicators: Vec::new(),
            retry_after: None,
        }
    }
}

/// Score produced by a single family before combination.
#[derive(Debug)]
struct FamilyScore {
    detection_type: DetectionType,
    confidence: f32,
    indicators: Vec<String>,
    authoritative: bool,
}

impl FamilyScore {
    fn new(detection_type: DetectionType, confidence: f32, indicators: Vec<String>) -> Self {
        Self {
            detection_type,
            confidence,
            indicators,
            authoritative: false,
        }
    }
}

struct Term {
    label: &'static str,
    regex: Regex,
}

fn terms(raw: &[(&'static str, &str)]) -> Vec<Term> {
    raw.iter()
        .map(|&(label, pattern)| Term {
            label,
            regex: build_regex(pattern),
        })
        .collect()
}

static CAPTCHA_TERMS: Lazy<Vec<Term>> = Lazy::new(|| {
    terms(&[
        ("recaptcha", r"re-?captcha"),
        ("hcaptcha", r"h-?captcha"),
        ("cf-challenge", r"cf-challenge"),
        ("cf-turnstile", r"cf-turnstile"),
        ("captcha", r"captcha"),
        ("verify you are human", r"verify\s+you\s+are\s+(?:a\s+)?human"),
        ("are you a robot", r"are\s+you\s+a\s+robot"),
    ])
});

static CAPTCHA_URL: Lazy<Regex> = Lazy::new(|| build_regex(r"captcha|challenge"));

static RATE_LIMIT_PHRASES: Lazy<Vec<Term>> = Lazy::new(|| {
    terms(&[
        ("too many requests", r"too\s+many\s+requests"),
        ("rate limit", r"rate[\s-]?limit(?:ed|ing)?"),
        ("slow down", r"slow\s+down"),
        ("try again later", r"try\s+again\s+later"),
    ])
});

static BLOCK_PHRASES: Lazy<Vec<Term>> = Lazy::new(|| {
    terms(&[
        ("access denied", r"access\s+denied"),
        ("forbidden", r"forbidden"),
        ("blocked", r"\bblocked\b"),
        ("banned", r"\bbanned\b"),
    ])
});

static JS_CHALLENGE_MARKERS: Lazy<Vec<Term>> = Lazy::new(|| {
    terms(&[
        ("noscript", r"<noscript"),
        ("enable javascript", r"enable\s+javascript"),
        ("_cf_chl_opt", r"_cf_chl_opt"),
        ("challenge-platform", r"challenge-platform"),
        ("jschl", r"jschl"),
        ("navigator.webdriver", r"navigator\.webdriver"),
        ("__webdriver_", r"__webdriver_"),
        ("datadome", r"datadome"),
        ("perimeterx", r"perimeterx"),
    ])
});

fn matched_labels(terms: &[Term], haystack: &str) -> Vec<&'static str> {
    terms
        .iter()
        .filter(|term| term.regex.is_match(haystack))
        .map(|term| term.label)
        .collect()
}

/// Stateless classifier. Identical input always yields an identical result.
#[derive(Debug, Default, Clone, Copy)]
pub struct Detector;

impl Detector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, response: &ResponseView<'_>) -> DetectionResult {
        let scores = [
            captcha_family(response),
            ip_block_family(response),
            rate_limit_family(response),
            js_challenge_family(response),
        ];

        let winner = scores
            .into_iter()
            .flatten()
            .filter(|score| score.confidence >= ACCEPTANCE_THRESHOLD)
            .min_by(|a, b| {
                b.authoritative
                    .cmp(&a.authoritative)
                    .then_with(|| b.confidence.total_cmp(&a.confidence))
                    .then_with(|| a.detection_type.rank().cmp(&b.detection_type.rank()))
            });

        let Some(score) = winner else {
            return DetectionResult::clean();
        };

        let retry_after = (score.detection_type == DetectionType::RateLimit)
            .then(|| read_retry_after(response))
            .flatten();

        log::debug!(
            "detected {} (confidence {:.2}, {} indicators)",
            score.detection_type.as_str(),
            score.confidence,
            score.indicators.len()
        );

        DetectionResult {
            detected: true,
            detection_type: score.detection_type,
            confidence: score.confidence.clamp(0.0, 1.0),
            indicators: score.indicators,
            retry_after,
        }
    }
}

fn read_retry_after(response: &ResponseView<'_>) -> Option<Duration> {
    signals::retry_after(response.headers)
        .inspect_err(|err| log::debug!("ignoring retry-after: {err}"))
        .ok()
        .flatten()
}

fn captcha_family(response: &ResponseView<'_>) -> Option<FamilyScore> {
    let mut indicators: Vec<String> = matched_labels(&CAPTCHA_TERMS, response.body)
        .into_iter()
        .map(|label| format!("captcha term matched: {label}"))
        .collect();

    if let Some(url) = response.url {
        let target = format!("{}?{}", url.path(), url.query().unwrap_or_default());
        if CAPTCHA_URL.is_match(&target) {
            indicators.push(format!("captcha url: {}", url.path()));
        }
    }

    let confidence = match indicators.len() {
        0 => return None,
        1 => 0.9,
        _ => 0.95,
    };
    Some(FamilyScore::new(DetectionType::Captcha, confidence, indicators))
}

fn rate_limit_family(response: &ResponseView<'_>) -> Option<FamilyScore> {
    let mut indicators = Vec::new();
    let status_signal = response.status == 429;

    if status_signal {
        indicators.push("http status 429".to_string());
    }
    if response.headers.contains_key(RETRY_AFTER) {
        indicators.push("retry-after header present".to_string());
    }
    let phrases = matched_labels(&RATE_LIMIT_PHRASES, response.body);
    if !phrases.is_empty() {
        indicators.push(format!("rate limit phrase: {}", phrases.join(", ")));
    }

    let confidence = match indicators.len() {
        0 => return None,
        1 => 0.6,
        _ => 0.9,
    };
    let mut score = FamilyScore::new(DetectionType::RateLimit, confidence, indicators);
    score.authoritative = status_signal;
    Some(score)
}

fn ip_block_family(response: &ResponseView<'_>) -> Option<FamilyScore> {
    if !matches!(response.status, 401 | 403) {
        return None;
    }

    let mut indicators = vec![format!("http status {}", response.status)];
    let phrases = matched_labels(&BLOCK_PHRASES, response.body);
    let confidence = if phrases.is_empty() {
        0.7
    } else {
        indicators.push(format!("block phrase: {}", phrases.join(", ")));
        0.9
    };
    Some(FamilyScore::new(DetectionType::IpBlock, confidence, indicators))
}

fn js_challenge_family(response: &ResponseView<'_>) -> Option<FamilyScore> {
    let markers = matched_labels(&JS_CHALLENGE_MARKERS, response.body);
    if markers.is_empty() {
        return None;
    }

    let visible = signals::visible_text(response.body).chars().count();
    if visible > JS_CHALLENGE_MAX_VISIBLE_CHARS {
        return None;
    }

    let confidence = (0.6 + 0.1 * (markers.len() - 1) as f32).min(0.8);
    let mut indicators: Vec<String> = markers
        .into_iter()
        .map(|label| format!("challenge marker: {label}"))
        .collect();
    indicators.push(format!("visible text: {visible} chars"));
    Some(FamilyScore::new(DetectionType::JsChallenge, confidence, indicators))
}

fn build_regex(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid detection regex `{}`: {}", pattern, err))
}
