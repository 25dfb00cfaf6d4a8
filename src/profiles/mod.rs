//! Synthetic behavioural/fingerprint profiles and the pool that owns them.
//!
//! The [`ProfileGenerator`] is the single owner of every [`Profile`]. Callers
//! receive copies; in-place updates are limited to the outcome counters and
//! `last_used_at`. Fingerprints and behaviour configs are replaced wholesale.

pub mod pools;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Builder;

/// Profiles need at least this many observations before they are ranked or pruned.
pub const DEFAULT_MIN_SAMPLE_SIZE: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileType {
    #[default]
    Random,
    Conservative,
    Aggressive,
}

impl ProfileType {
    fn mouse_dpi(self) -> RangeInclusive<u32> {
        match self {
            ProfileType::Random => 800..=1600,
            ProfileType::Conservative => 400..=800,
            ProfileType::Aggressive => 1600..=3200,
        }
    }

    fn typing_wpm(self) -> RangeInclusive<u32> {
        match self {
            ProfileType::Random => 50..=70,
            ProfileType::Conservative => 30..=50,
            ProfileType::Aggressive => 70..=100,
        }
    }

    fn polling_rates(self) -> &'static [u32] {
        match self {
            ProfileType::Random => &[250, 500],
            ProfileType::Conservative => &[125, 250],
            ProfileType::Aggressive => &[500, 1000],
        }
    }

    fn error_rate(self) -> RangeInclusive<f32> {
        match self {
            ProfileType::Random => 0.015..=0.025,
            ProfileType::Conservative => 0.01..=0.03,
            ProfileType::Aggressive => 0.005..=0.015,
        }
    }

    fn pause_frequency(self) -> RangeInclusive<f32> {
        match self {
            ProfileType::Random => 0.2..=0.4,
            ProfileType::Conservative => 0.3..=0.5,
            ProfileType::Aggressive => 0.1..=0.2,
        }
    }

    fn scroll_patterns(self) -> &'static [ScrollPattern] {
        match self {
            ProfileType::Random => &[ScrollPattern::Linear, ScrollPattern::Natural, ScrollPattern::Burst],
            ProfileType::Conservative => &[ScrollPattern::Natural, ScrollPattern::Linear],
            ProfileType::Aggressive => &[ScrollPattern::Burst, ScrollPattern::Linear],
        }
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfileType::Random => "random",
            ProfileType::Conservative => "conservative",
            ProfileType::Aggressive => "aggressive",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u16,
    pub height: u16,
}

/// Static client-identity surface presented to a remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub user_agent: String,
    pub screen_size: ScreenSize,
    pub fonts: BTreeSet<String>,
    pub plugins: BTreeSet<String>,
    pub webgl_hash: String,
    pub canvas_hash: String,
    pub timezone: String,
    pub language: String,
    pub platform: String,
    pub hardware_concurrency: u8,
    pub webgl_vendor: String,
    pub webgl_renderer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollPattern {
    Linear,
    Natural,
    Burst,
}

/// Closed interval drawn from a profile type's band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: u32,
    pub max: u32,
}

impl ValueRange {
    /// Random sub-interval of `band`.
    fn sample<R: Rng + ?Sized>(rng: &mut R, band: RangeInclusive<u32>) -> Self {
        let (lo, hi) = (*band.start(), *band.end());
        let min = rng.gen_range(lo..=hi);
        let max = rng.gen_range(min..=hi);
        Self { min, max }
    }

}

/// Human input characteristics used when driving a browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorConfig {
    pub mouse_dpi_range: ValueRange,
    pub typing_wpm_range: ValueRange,
    pub scroll_pattern: ScrollPattern,
    pub polling_rate_hz: u32,
    pub error_rate: f32,
    pub pause_frequency: f32,
}

impl BehaviorConfig {
    pub fn sample<R: Rng + ?Sized>(rng: &mut R, profile_type: ProfileType) -> Self {
        Self {
            mouse_dpi_range: ValueRange::sample(rng, profile_type.mouse_dpi()),
            typing_wpm_range: ValueRange::sample(rng, profile_type.typing_wpm()),
            scroll_pattern: profile_type
                .scroll_patterns()
                .choose(rng)
                .copied()
                .unwrap_or(ScrollPattern::Natural),
            polling_rate_hz: profile_type.polling_rates().choose(rng).copied().unwrap_or(250),
            error_rate: rng.gen_range(profile_type.error_rate()),
            pause_frequency: rng.gen_range(profile_type.pause_frequency()),
        }
    }
}

/// Fingerprint + behaviour pair with tracked outcome history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub profile_id: String,
    pub profile_type: ProfileType,
    pub fingerprint: Fingerprint,
    pub behavior_config: BehaviorConfig,
    pub success_count: u32,
    pub failure_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Profile {
    fn new(
        profile_id: String,
        profile_type: ProfileType,
        fingerprint: Fingerprint,
        behavior_config: BehaviorConfig,
    ) -> Self {
        Self {
            profile_id,
            profile_type,
            fingerprint,
            behavior_config,
            success_count: 0,
            failure_count: 0,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    pub fn observations(&self) -> u32 {
        self.success_count.saturating_add(self.failure_count)
    }

    pub fn success_rate(&self) -> f64 {
        match self.observations() {
            0 => 0.0,
            total => self.success_count as f64 / total as f64,
        }
    }
}

/// Creates, owns, ranks and prunes profiles.
#[derive(Debug)]
pub struct ProfileGenerator {
    pool: HashMap<String, Profile>,
    min_sample_size: u32,
    rng: StdRng,
}

impl Default for ProfileGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SAMPLE_SIZE)
    }
}

impl ProfileGenerator {
    pub fn new(min_sample_size: u32) -> Self {
        Self::with_rng(min_sample_size, StdRng::from_entropy())
    }

    /// Reproducible generator: identical seeds synthesize identical profiles,
    /// ids included.
    pub fn seeded(min_sample_size: u32, seed: u64) -> Self {
        Self::with_rng(min_sample_size, StdRng::seed_from_u64(seed))
    }

    fn with_rng(min_sample_size: u32, rng: StdRng) -> Self {
        Self {
            pool: HashMap::new(),
            min_sample_size: min_sample_size.max(1),
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn get(&self, profile_id: &str) -> Option<&Profile> {
        self.pool.get(profile_id)
    }

    /// Synthesize a profile, add it to the pool and return a copy.
    pub fn generate_profile(&mut self, profile_type: ProfileType) -> Profile {
        let profile = Profile::new(
            self.next_id(),
            profile_type,
            pools::sample_fingerprint(&mut self.rng),
            BehaviorConfig::sample(&mut self.rng, profile_type),
        );
        log::debug!("generated {} profile {}", profile_type, profile.profile_id);
        self.insert(profile)
    }

    fn next_id(&mut self) -> String {
        Builder::from_random_bytes(self.rng.r#gen()).into_uuid().to_string()
    }

    fn insert(&mut self, profile: Profile) -> Profile {
        self.pool
            .insert(profile.profile_id.clone(), profile.clone());
        profile
    }

    /// Best ranked profile with enough history, or a fresh `random` one.
    pub fn get_best_profile(&mut self, exclude: Option<&str>) -> Profile {
        let best = self
            .pool
            .values()
            .filter(|profile| profile.observations() >= self.min_sample_size)
            .filter(|profile| exclude != Some(profile.profile_id.as_str()))
            .max_by(|a, b| {
                a.success_rate()
                    .total_cmp(&b.success_rate())
                    .then_with(|| a.last_used_at.cmp(&b.last_used_at))
            })
            .cloned();

        match best {
            Some(profile) => profile,
            None => {
                log::debug!("no ranked profile available, generating a fresh one");
                self.generate_profile(ProfileType::Random)
            }
        }
    }

    /// Drop every sufficiently observed profile whose success rate is below
    /// `threshold`. Returns how many were removed.
    pub fn remove_failed_profiles(&mut self, threshold: f64) -> usize {
        self.remove_failed_profiles_except(threshold, None)
    }

    pub(crate) fn remove_failed_profiles_except(
        &mut self,
        threshold: f64,
        keep: Option<&str>,
    ) -> usize {
        let min_sample_size = self.min_sample_size;
        let before = self.pool.len();
        self.pool.retain(|id, profile| {
            keep == Some(id.as_str())
                || profile.observations() < min_sample_size
                || profile.success_rate() >= threshold
        });
        before - self.pool.len()
    }

    /// Replace only the behaviour config; identity and fingerprint are kept.
    pub fn regenerate_behavior(
        &mut self,
        profile_id: &str,
        profile_type: ProfileType,
    ) -> Option<Profile> {
        let profile = self.pool.get_mut(profile_id)?;
        profile.behavior_config = BehaviorConfig::sample(&mut self.rng, profile_type);
        Some(profile.clone())
    }

    /// New identity with a fresh fingerprint and the old behaviour. The old
    /// profile stays in the pool with its history.
    pub fn regenerate_fingerprint(&mut self, profile_id: &str) -> Option<Profile> {
        let previous = self.pool.get(profile_id)?;
        let (profile_type, behavior_config) =
            (previous.profile_type, previous.behavior_config.clone());
        let profile = Profile::new(
            self.next_id(),
            profile_type,
            pools::sample_fingerprint(&mut self.rng),
            behavior_config,
        );
        Some(self.insert(profile))
    }

    pub fn record_outcome(&mut self, profile_id: &str, success: bool) -> Option<Profile> {
        let profile = self.pool.get_mut(profile_id)?;
        if success {
            profile.success_count = profile.success_count.saturating_add(1);
        } else {
            profile.failure_count = profile.failure_count.saturating_add(1);
        }
        profile.last_used_at = Some(Utc::now());
        Some(profile.clone())
    }

    pub fn touch(&mut self, profile_id: &str) {
        if let Some(profile) = self.pool.get_mut(profile_id) {
            profile.last_used_at = Some(Utc::now());
        }
    }
}
