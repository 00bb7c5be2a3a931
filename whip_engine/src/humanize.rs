// Humanization: coherent-noise micro-timing and velocity drift.
//
// Mechanical grids sound mechanical. Every generator passes its notes
// through a shared `Humanizer`, which nudges each note's onset time and
// velocity by an amount read from smooth 1-D gradient noise rather than
// white noise, so consecutive notes drift together the way a player's feel
// does instead of jittering independently.
//
// Each voice keeps its own logical time index that advances by one per
// humanized note. Voices are decorrelated by reading the noise at a fixed
// per-voice time offset. The noise itself is a pure function of
// `(time, frequency)` over a permutation table shuffled once from the seed,
// so identical note sequences receive identical humanization. Wall-clock
// time never enters the computation.
//
// Scaling:
// - timing: ±`timing_range_ms` × intensity × mood multiplier, halved on
//   strong beats so downbeats stay anchored.
// - velocity: ±`velocity_range` × intensity × mood multiplier, amplified
//   for ghost notes (velocity below `GHOST_VELOCITY`).

use crate::config::HumanizeConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use whip_prng::EngineRng;

/// Velocities below this are ghost notes and get amplified drift.
pub const GHOST_VELOCITY: u8 = 50;

/// Time offset between voices on the noise axis.
const VOICE_TIME_OFFSET: f64 = 1013.0;

/// Extra offset for the velocity channel so it does not mirror timing.
const VELOCITY_TIME_OFFSET: f64 = 517.0;

const PERMUTATION_SIZE: usize = 256;

/// Phase added to every read. Logical time advances in whole steps and the
/// noise is zero on the lattice, so reads stay off it for any frequency.
const SAMPLE_PHASE: f64 = 0.618_033_988_749_895;

/// Performance mood, set by `context:mood`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mood {
    #[default]
    Calm,
    Happy,
    Energetic,
    Tense,
    Melancholic,
    Dreamy,
}

impl Mood {
    pub fn parse(name: &str) -> Mood {
        match name.trim().to_ascii_lowercase().as_str() {
            "calm" => Mood::Calm,
            "happy" => Mood::Happy,
            "energetic" => Mood::Energetic,
            "tense" => Mood::Tense,
            "melancholic" | "sad" => Mood::Melancholic,
            "dreamy" => Mood::Dreamy,
            other => {
                warn!(mood = other, "unknown mood, using calm");
                Mood::Calm
            }
        }
    }

    /// Multiplier applied to timing drift.
    pub fn timing_multiplier(self) -> f64 {
        match self {
            Mood::Calm => 0.7,
            Mood::Happy => 1.0,
            Mood::Energetic => 0.8,
            Mood::Tense => 0.6,
            Mood::Melancholic => 1.2,
            Mood::Dreamy => 1.5,
        }
    }

    /// Multiplier applied to velocity drift.
    pub fn velocity_multiplier(self) -> f64 {
        match self {
            Mood::Calm => 0.6,
            Mood::Happy => 1.0,
            Mood::Energetic => 1.4,
            Mood::Tense => 1.2,
            Mood::Melancholic => 0.8,
            Mood::Dreamy => 0.7,
        }
    }
}

/// Payload of `context:mood`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodMessage {
    pub mood: String,
}

/// Smooth 1-D gradient noise in [-1, 1].
#[derive(Debug, Clone)]
pub struct CoherentNoise {
    perm: [u8; PERMUTATION_SIZE],
}

impl CoherentNoise {
    pub fn new(seed: u64) -> Self {
        let mut rng = EngineRng::new(seed);
        let mut perm = [0u8; PERMUTATION_SIZE];
        for (i, p) in perm.iter_mut().enumerate() {
            *p = i as u8;
        }
        // Fisher-Yates.
        for i in (1..PERMUTATION_SIZE).rev() {
            let j = rng.range_usize(0, i + 1);
            perm.swap(i, j);
        }
        CoherentNoise { perm }
    }

    fn gradient(&self, lattice: i64) -> f64 {
        let idx = lattice.rem_euclid(PERMUTATION_SIZE as i64) as usize;
        self.perm[idx] as f64 / 127.5 - 1.0
    }

    /// Noise at position `x`. Zero at every lattice point, smooth between.
    pub fn noise(&self, x: f64) -> f64 {
        if !x.is_finite() {
            return 0.0;
        }
        let x0 = x.floor();
        let t = x - x0;
        let i0 = x0 as i64;
        let n0 = self.gradient(i0) * t;
        let n1 = self.gradient(i0 + 1) * (t - 1.0);
        let fade = t * t * t * (t * (t * 6.0 - 15.0) + 10.0);
        // Raw 1-D gradient noise peaks at ±0.5.
        ((n0 + fade * (n1 - n0)) * 2.0).clamp(-1.0, 1.0)
    }

    /// Noise read at `time` scaled by `frequency`.
    pub fn sample(&self, time: f64, frequency: f64) -> f64 {
        self.noise(time * frequency + SAMPLE_PHASE)
    }
}

/// Result of humanizing one note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Humanization {
    /// Onset offset in milliseconds; negative means early.
    pub timing_ms: f64,
    /// Final velocity after drift, 1..=127.
    pub velocity: u8,
}

#[derive(Debug, Clone)]
pub struct Humanizer {
    noise: CoherentNoise,
    settings: HumanizeConfig,
    mood: Mood,
    /// Logical time index per voice.
    times: BTreeMap<u32, f64>,
}

impl Humanizer {
    pub fn new(seed: u64, settings: HumanizeConfig) -> Self {
        let mood = settings.mood;
        Humanizer {
            noise: CoherentNoise::new(seed),
            settings,
            mood,
            times: BTreeMap::new(),
        }
    }

    pub fn mood(&self) -> Mood {
        self.mood
    }

    pub fn set_mood(&mut self, mood: Mood) {
        self.mood = mood;
    }

    pub fn intensity(&self) -> f64 {
        self.settings.intensity
    }

    /// Current logical time of a voice.
    pub fn voice_time(&self, voice: u32) -> f64 {
        self.times.get(&voice).copied().unwrap_or(0.0)
    }

    /// Offsets for a note on `voice` at logical time `time`, without
    /// advancing anything.
    pub fn offsets_at(&self, voice: u32, time: f64, strong_beat: bool, velocity: u8) -> Humanization {
        let intensity = self.settings.intensity.clamp(0.0, 1.0);
        let t = time + voice as f64 * VOICE_TIME_OFFSET;
        let freq = self.settings.frequency;

        let mut timing = self.noise.sample(t, freq)
            * self.settings.timing_range_ms
            * intensity
            * self.mood.timing_multiplier();
        if strong_beat {
            timing *= 0.5;
        }

        let mut vel_offset = self.noise.sample(t + VELOCITY_TIME_OFFSET, freq)
            * self.settings.velocity_range
            * intensity
            * self.mood.velocity_multiplier();
        if velocity < GHOST_VELOCITY {
            vel_offset *= 1.5;
        }

        let final_velocity = (velocity as f64 + vel_offset).round().clamp(1.0, 127.0) as u8;
        Humanization {
            timing_ms: timing.round(),
            velocity: final_velocity,
        }
    }

    /// Humanize the next note on `voice` and advance its logical time.
    pub fn humanize(&mut self, voice: u32, strong_beat: bool, velocity: u8) -> Humanization {
        let time = self.voice_time(voice);
        let result = self.offsets_at(voice, time, strong_beat, velocity);
        self.times.insert(voice, time + 1.0);
        result
    }

    /// Rewind every voice to time zero.
    pub fn reset(&mut self) {
        self.times.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_settings() -> HumanizeConfig {
        HumanizeConfig {
            intensity: 1.0,
            timing_range_ms: 20.0,
            velocity_range: 10.0,
            frequency: 0.37,
            mood: Mood::Happy,
        }
    }

    #[test]
    fn noise_is_bounded_and_smooth() {
        let noise = CoherentNoise::new(1);
        let mut prev = noise.noise(0.0);
        for i in 1..2000 {
            let x = i as f64 * 0.01;
            let v = noise.noise(x);
            assert!((-1.0..=1.0).contains(&v));
            assert!((v - prev).abs() < 0.2, "noise jumped at {x}");
            prev = v;
        }
        assert_eq!(noise.noise(3.0), 0.0);
        assert_eq!(noise.noise(f64::NAN), 0.0);
    }

    #[test]
    fn same_seed_same_humanization() {
        let mut a = Humanizer::new(9, full_settings());
        let mut b = Humanizer::new(9, full_settings());
        for i in 0..64 {
            let strong = i % 4 == 0;
            assert_eq!(a.humanize(1, strong, 90), b.humanize(1, strong, 90));
        }
    }

    #[test]
    fn zero_intensity_is_identity() {
        let mut settings = full_settings();
        settings.intensity = 0.0;
        let mut h = Humanizer::new(3, settings);
        for _ in 0..32 {
            let r = h.humanize(0, false, 77);
            assert_eq!(r.timing_ms, 0.0);
            assert_eq!(r.velocity, 77);
        }
    }

    #[test]
    fn offsets_respect_range() {
        let mut h = Humanizer::new(5, full_settings());
        for i in 0..500 {
            let r = h.humanize(2, i % 2 == 0, 100);
            assert!(r.timing_ms.abs() <= 20.0);
            assert!((90..=110).contains(&r.velocity) || r.velocity == 127);
        }
    }

    #[test]
    fn strong_beats_are_tighter() {
        let h = Humanizer::new(11, full_settings());
        for i in 0..100 {
            let t = i as f64 + 0.5;
            let weak = h.offsets_at(0, t, false, 90).timing_ms;
            let strong = h.offsets_at(0, t, true, 90).timing_ms;
            assert!(strong.abs() <= weak.abs() + 0.5);
        }
    }

    #[test]
    fn voices_are_decorrelated() {
        let h = Humanizer::new(13, full_settings());
        let differs = (0..50).any(|i| {
            let t = i as f64 + 0.3;
            h.offsets_at(0, t, false, 90) != h.offsets_at(1, t, false, 90)
        });
        assert!(differs);
    }

    #[test]
    fn voice_time_advances_per_note() {
        let mut h = Humanizer::new(1, full_settings());
        h.humanize(4, false, 80);
        h.humanize(4, false, 80);
        assert_eq!(h.voice_time(4), 2.0);
        assert_eq!(h.voice_time(5), 0.0);
        h.reset();
        assert_eq!(h.voice_time(4), 0.0);
    }

    #[test]
    fn whole_number_frequencies_still_drift() {
        for frequency in [1.0, 2.0, 0.5] {
            let settings = HumanizeConfig {
                frequency,
                ..full_settings()
            };
            let mut h = Humanizer::new(21, settings);
            let results: Vec<Humanization> = (0..32).map(|_| h.humanize(0, false, 90)).collect();
            assert!(results.iter().any(|r| r.timing_ms != 0.0), "no timing drift at {frequency}");
            assert!(results.iter().any(|r| r.velocity != 90), "no velocity drift at {frequency}");
        }
    }

    #[test]
    fn mood_parsing() {
        assert_eq!(Mood::parse("Energetic"), Mood::Energetic);
        assert_eq!(Mood::parse("grumpy"), Mood::Calm);
    }
}
