//! Low-level signal extraction shared by the detection families.
//!
//! Every helper here is fallible in the narrow sense: a malformed header or an
//! unreadable body fragment yields a [`DetectionParseError`], which callers log
//! and treat as an absent signal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use http::HeaderMap;
use http::header::RETRY_AFTER;
use scraper::{Html, Node};
use thiserror::Error;

/// Failure to read a signal out of a response fragment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectionParseError {
    #[error("header `{0}` is not valid visible ASCII")]
    NonAsciiHeader(&'static str),
    #[error("retry-after value `{0}` is neither delta-seconds nor an HTTP date")]
    InvalidRetryAfter(String),
}

/// Tags whose text content never reaches the rendered page.
const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Read `Retry-After` as a wait hint. `Ok(None)` when the header is absent.
pub fn retry_after(headers: &HeaderMap) -> Result<Option<Duration>, DetectionParseError> {
    let Some(value) = headers.get(RETRY_AFTER) else {
        return Ok(None);
    };

    let raw = value
        .to_str()
        .map_err(|_| DetectionParseError::NonAsciiHeader("retry-after"))?
        .trim();

    if let Ok(seconds) = raw.parse::<f64>()
        && seconds.is_finite()
        && seconds >= 0.0
    {
        return Duration::try_from_secs_f64(seconds)
            .map(Some)
            .map_err(|_| DetectionParseError::InvalidRetryAfter(raw.to_string()));
    }

    let date = DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map_err(|_| DetectionParseError::InvalidRetryAfter(raw.to_string()))?;

    // A date in the past means "retry now".
    Ok(Some(
        (date.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or_default(),
    ))
}

/// Text a user would actually see once the page renders, whitespace-collapsed.
pub fn visible_text(body: &str) -> String {
    let document = Html::parse_document(body);
    let mut parts = Vec::new();

    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| HIDDEN_TAGS.contains(&element.name()))
        });
        if hidden {
            continue;
        }

        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.split_whitespace().collect::<Vec<_>>().join(" "));
        }
    }

    parts.join(" ")
}
