//! Sampling pools for synthetic browser fingerprints.
//!
//! Each browser family carries its own user agents and plugin set so sampled
//! fingerprints stay internally plausible. The remaining fields are drawn
//! independently.

use std::collections::BTreeSet;

use rand::Rng;
use rand::seq::SliceRandom;

use super::{Fingerprint, ScreenSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
    Edge,
}

struct BrowserTemplate {
    family: BrowserFamily,
    user_agents: &'static [&'static str],
    plugins: &'static [&'static str],
}

static TEMPLATES: &[BrowserTemplate] = &[
    BrowserTemplate {
        family: BrowserFamily::Chrome,
        user_agents: &[
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.5993.90 Safari/537.36",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.5993.90 Safari/537.36",
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0.5938.92 Safari/537.36",
        ],
        plugins: &["Chrome PDF Plugin", "Chrome PDF Viewer", "Native Client"],
    },
    BrowserTemplate {
        family: BrowserFamily::Firefox,
        user_agents: &[
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 13.6; rv:118.0) Gecko/20100101 Firefox/118.0",
            "Mozilla/5.0 (X11; Linux x86_64; rv:119.0) Gecko/20100101 Firefox/119.0",
        ],
        plugins: &["PDF.js"],
    },
    BrowserTemplate {
        family: BrowserFamily::Safari,
        user_agents: &[
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_6_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
        ],
        plugins: &["Apple PDF Plugin"],
    },
    BrowserTemplate {
        family: BrowserFamily::Edge,
        user_agents: &[
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.5993.90 Safari/537.36 Edg/118.0.2088.76",
        ],
        plugins: &["Chrome PDF Plugin", "Chrome PDF Viewer", "Native Client"],
    },
];

const SCREEN_SIZES: &[(u16, u16)] = &[
    (1920, 1080),
    (2560, 1440),
    (3840, 2160),
    (1680, 1050),
    (1600, 900),
    (1440, 900),
    (1536, 864),
    (1366, 768),
    (1280, 1024),
    (1280, 800),
];

const FONTS: &[&str] = &[
    "Arial",
    "Verdana",
    "Tahoma",
    "Trebuchet MS",
    "Times New Roman",
    "Georgia",
    "Courier New",
    "Lucida Console",
    "Impact",
    "Comic Sans MS",
    "Helvetica",
    "Geneva",
    "Menlo",
    "Monaco",
    "Avenir",
    "Futura",
    "Gill Sans",
    "Ubuntu",
    "DejaVu Sans",
    "DejaVu Serif",
    "Liberation Sans",
    "Liberation Serif",
    "Roboto",
    "Noto Sans",
    "sans-serif",
    "serif",
    "monospace",
];

const TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Chicago",
    "America/Denver",
    "America/Los_Angeles",
    "America/Toronto",
    "America/Sao_Paulo",
    "Europe/London",
    "Europe/Berlin",
    "Europe/Paris",
    "Europe/Madrid",
    "Asia/Tokyo",
    "Asia/Seoul",
    "Asia/Singapore",
    "Australia/Sydney",
];

const LANGUAGES: &[&str] = &[
    "en-US", "en-GB", "en-CA", "en-AU", "fr-FR", "de-DE", "es-ES", "es-MX", "it-IT", "pt-BR",
    "nl-NL", "sv-SE", "ja-JP", "ko-KR",
];

const WEBGL_VENDORS: &[&str] = &[
    "Google Inc.",
    "Intel Inc.",
    "NVIDIA Corporation",
    "AMD",
    "Apple Inc.",
];

const WEBGL_RENDERERS: &[&str] = &[
    "ANGLE (Intel(R) UHD Graphics 620 Direct3D11 vs_5_0 ps_5_0)",
    "ANGLE (NVIDIA GeForce GTX 1060 Direct3D11 vs_5_0 ps_5_0)",
    "ANGLE (NVIDIA GeForce RTX 3080)",
    "ANGLE (AMD Radeon RX 580 Direct3D11 vs_5_0 ps_5_0)",
    "Intel Iris OpenGL Engine",
    "Apple M1 GPU",
];

const HARDWARE_CONCURRENCY: &[u8] = &[4, 8, 12, 16];

/// Fonts are drawn as a subset of this size range.
const FONT_COUNT: (usize, usize) = (12, 22);

fn platform_for(user_agent: &str) -> &'static str {
    let ua = user_agent.to_ascii_lowercase();
    if ua.contains("windows") {
        "Win32"
    } else if ua.contains("mac") {
        "MacIntel"
    } else if ua.contains("linux") {
        "Linux x86_64"
    } else {
        "Win32"
    }
}

fn pick<R: Rng + ?Sized>(rng: &mut R, pool: &[&'static str], fallback: &'static str) -> String {
    pool.choose(rng).copied().unwrap_or(fallback).to_string()
}

/// Draw a fresh fingerprint.
pub fn sample_fingerprint<R: Rng + ?Sized>(rng: &mut R) -> Fingerprint {
    let template = TEMPLATES.choose(rng).unwrap_or(&TEMPLATES[0]);
    let user_agent = pick(rng, template.user_agents, template.user_agents[0]);

    let (width, height) = SCREEN_SIZES.choose(rng).copied().unwrap_or((1920, 1080));

    let font_count = rng.gen_range(FONT_COUNT.0..=FONT_COUNT.1).min(FONTS.len());
    let fonts: BTreeSet<String> = FONTS
        .choose_multiple(rng, font_count)
        .map(|font| font.to_string())
        .collect();

    let plugins: BTreeSet<String> = template
        .plugins
        .iter()
        .map(|plugin| plugin.to_string())
        .collect();

    let webgl_seed: u64 = rng.r#gen();
    let canvas_seed: u128 = rng.r#gen();

    Fingerprint {
        platform: platform_for(&user_agent).to_string(),
        user_agent,
        screen_size: ScreenSize { width, height },
        fonts,
        plugins,
        webgl_vendor: pick(rng, WEBGL_VENDORS, "Google Inc."),
        webgl_renderer: pick(rng, WEBGL_RENDERERS, "ANGLE (NVIDIA GeForce RTX 3080)"),
        webgl_hash: format!("{webgl_seed:016x}"),
        canvas_hash: format!("{canvas_seed:032x}"),
        timezone: pick(rng, TIMEZONES, "UTC"),
        language: pick(rng, LANGUAGES, "en-US"),
        hardware_concurrency: HARDWARE_CONCURRENCY.choose(rng).copied().unwrap_or(8),
    }
}

/// Browser family implied by a user agent string.
pub fn browser_family(user_agent: &str) -> BrowserFamily {
    TEMPLATES
        .iter()
        .find(|template| template.user_agents.contains(&user_agent))
        .map(|template| template.family)
        .unwrap_or(BrowserFamily::Chrome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugins_follow_browser_family() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let fp = sample_fingerprint(&mut rng);
            let expected = match browser_family(&fp.user_agent) {
                BrowserFamily::Firefox => "PDF.js",
                BrowserFamily::Safari => "Apple PDF Plugin",
                BrowserFamily::Chrome | BrowserFamily::Edge => "Chrome PDF Viewer",
            };
            assert!(fp.plugins.contains(expected), "{fp:?}");
        }
    }

    #[test]
    fn hashes_are_fixed_width_hex() {
        let fp = sample_fingerprint(&mut rand::thread_rng());
        assert_eq!(fp.webgl_hash.len(), 16);
        assert_eq!(fp.canvas_hash.len(), 32);
        assert!(fp.canvas_hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(fp.fonts.len() >= FONT_COUNT.0);
    }
}
