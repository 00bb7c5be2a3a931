// Data-driven engine configuration.
//
// Every tunable the engine reads at construction lives in `EngineConfig`,
// loaded from JSON. All sections are `#[serde(default)]`, so a config file
// only needs the fields it changes, and an unreadable file degrades to the
// defaults with a warning instead of failing startup.
//
// Values here are starting points only. Once the engine runs, bindings and
// bus messages change generator parameters live; the config is not consulted
// again except by `Engine::reset()`.
//
// See also: engine.rs (`Engine::with_config`), clock.rs for `Clock`.

use crate::clock::Clock;
use crate::error::EngineResult;
use crate::humanize::Mood;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::warn;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seed for every random decision in the engine.
    pub seed: u64,
    pub clock: Clock,
    pub harmony: HarmonyConfig,
    pub rhythm: RhythmConfig,
    pub solo: SoloConfig,
    pub humanize: HumanizeConfig,
    pub channels: ChannelConfig,
    /// How many ticks ahead playhead lookahead windows reach.
    pub lookahead_ticks: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            seed: 0x5eed,
            clock: Clock::default(),
            harmony: HarmonyConfig::default(),
            rhythm: RhythmConfig::default(),
            solo: SoloConfig::default(),
            humanize: HumanizeConfig::default(),
            channels: ChannelConfig::default(),
            lookahead_ticks: 96 * 2,
        }
    }
}

/// Tonal centre and progression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonyConfig {
    /// Key-signature token, see pool.rs.
    pub pool_key: String,
    /// MIDI note of the tonic.
    pub tonic: u8,
    /// Progression style name (pop, jazz, blues, classical, modal).
    pub style: String,
    /// Fixed template name; `None` selects chords probabilistically.
    pub template: Option<String>,
    pub progression_length: usize,
    pub bars_per_chord: u64,
}

impl Default for HarmonyConfig {
    fn default() -> Self {
        HarmonyConfig {
            pool_key: "0".to_string(),
            tonic: 60,
            style: "pop".to_string(),
            template: None,
            progression_length: 4,
            bars_per_chord: 1,
        }
    }
}

/// Drummer and bassist starting state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhythmConfig {
    pub drum_style: String,
    pub bass_style: String,
    /// Initial density for both pattern engines, 0..1.
    pub density: f64,
    pub fills: bool,
    /// Octave of the bass root (MIDI octave, C2 = octave 2 → note 36).
    pub bass_octave: u8,
}

impl Default for RhythmConfig {
    fn default() -> Self {
        RhythmConfig {
            drum_style: "rock".to_string(),
            bass_style: "rock".to_string(),
            density: 0.3,
            fills: true,
            bass_octave: 2,
        }
    }
}

/// Soloist phrase settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoloConfig {
    pub phrase_length: usize,
    pub register_low: u8,
    pub register_high: u8,
    /// Probability that a fallback step sounds when no phrase is planned.
    pub activity: f64,
    pub weights: PhraseWeights,
}

impl Default for SoloConfig {
    fn default() -> Self {
        SoloConfig {
            phrase_length: 8,
            register_low: 60,
            register_high: 84,
            activity: 0.5,
            weights: PhraseWeights::default(),
        }
    }
}

/// Relative pull of each phrase-target contribution. Normalized to sum 1
/// before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhraseWeights {
    pub trend: f64,
    pub harmonic: f64,
    pub tension: f64,
    pub continuity: f64,
}

impl Default for PhraseWeights {
    fn default() -> Self {
        PhraseWeights {
            trend: 0.3,
            harmonic: 0.3,
            tension: 0.2,
            continuity: 0.2,
        }
    }
}

impl PhraseWeights {
    /// Weights scaled to sum 1. Negative or non-finite entries count as 0;
    /// an all-zero set becomes the defaults.
    pub fn normalized(self) -> PhraseWeights {
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let w = PhraseWeights {
            trend: clean(self.trend),
            harmonic: clean(self.harmonic),
            tension: clean(self.tension),
            continuity: clean(self.continuity),
        };
        let total = w.trend + w.harmonic + w.tension + w.continuity;
        if total <= 0.0 {
            return PhraseWeights::default();
        }
        PhraseWeights {
            trend: w.trend / total,
            harmonic: w.harmonic / total,
            tension: w.tension / total,
            continuity: w.continuity / total,
        }
    }
}

/// Humanizer settings shared by every generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanizeConfig {
    /// 0 disables humanization, 1 is full strength.
    pub intensity: f64,
    /// Maximum timing offset in milliseconds at full intensity.
    pub timing_range_ms: f64,
    /// Maximum velocity offset at full intensity.
    pub velocity_range: f64,
    /// Noise frequency: how quickly the drift wanders between notes.
    pub frequency: f64,
    /// Unknown names fall back to calm instead of rejecting the file.
    #[serde(deserialize_with = "lenient_mood")]
    pub mood: Mood,
}

fn lenient_mood<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Mood, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(name) => Ok(Mood::parse(&name)),
        other => {
            warn!(mood = %other, "mood is not a name, using calm");
            Ok(Mood::default())
        }
    }
}

impl Default for HumanizeConfig {
    fn default() -> Self {
        HumanizeConfig {
            intensity: 0.5,
            timing_range_ms: 20.0,
            velocity_range: 12.0,
            frequency: 0.35,
            mood: Mood::Calm,
        }
    }
}

/// MIDI channels (0-based) per generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub lead: u8,
    pub bass: u8,
    pub drums: u8,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            lead: 0,
            bass: 1,
            drums: 9,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Load from a JSON file, falling back to defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
                EngineConfig::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let config = EngineConfig::from_json(r#"{"seed": 7, "harmony": {"style": "jazz"}}"#).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.harmony.style, "jazz");
        assert_eq!(config.harmony.pool_key, "0");
        assert_eq!(config.clock, Clock::default());
    }

    #[test]
    fn json_roundtrip() {
        let config = EngineConfig::default();
        let restored = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(EngineConfig::from_json("{ nope").is_err());
        assert!(EngineConfig::from_json(r#"{"seed": "x"}"#).is_err());
    }

    #[test]
    fn unknown_mood_keeps_the_rest_of_the_file() {
        let json = r#"{"seed": 5, "humanize": {"intensity": 0.9, "mood": "grumpy"}}"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.seed, 5);
        assert_eq!(config.humanize.intensity, 0.9);
        assert_eq!(config.humanize.mood, Mood::Calm);

        let config = EngineConfig::from_json(r#"{"humanize": {"mood": "Dreamy"}}"#).unwrap();
        assert_eq!(config.humanize.mood, Mood::Dreamy);
        let config = EngineConfig::from_json(r#"{"humanize": {"mood": 4}}"#).unwrap();
        assert_eq!(config.humanize.mood, Mood::Calm);
    }

    #[test]
    fn missing_file_falls_back() {
        let config = EngineConfig::load_or_default(Path::new("/definitely/not/here.json"));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn weights_normalize() {
        let w = PhraseWeights {
            trend: 2.0,
            harmonic: 2.0,
            tension: 0.0,
            continuity: -1.0,
        }
        .normalized();
        assert!((w.trend - 0.5).abs() < 1e-12);
        assert_eq!(w.continuity, 0.0);

        let zero = PhraseWeights {
            trend: 0.0,
            harmonic: 0.0,
            tension: 0.0,
            continuity: f64::NAN,
        };
        assert_eq!(zero.normalized(), PhraseWeights::default());
    }
}
