// Drummer: density-layered General MIDI drum patterns with phrase fills.
//
// Each style is a `DensityPattern<DrumVoice>`: a groove skeleton that always
// plays plus layers (ghost notes, sixteenth hats, extra kicks, crashes) that
// fade in as density rises. The concrete grid is resynthesized whenever the
// density, the style or an explicit `regenerate` pulse changes it, and is
// then replayed bar after bar until the next change.
//
// On the last beat of every 8-bar phrase (bar 7 of 8, steps 12..16) a fill
// replaces the groove. The fill is picked once from the catalog for the
// current intensity bucket (light below 0.35, medium below 0.7, heavy above),
// cached for the four steps, and cleared afterwards.
//
// Voices map to General MIDI percussion keys, played on the drum channel
// (index 9 by default).

use crate::clock::{Clock, STEPS_PER_BAR};
use crate::config::RhythmConfig;
use crate::output::NoteRequest;
use crate::param::{ParameterKind, ParameterSet, ParameterTarget, ParameterValue};
use crate::pattern::{DensityPattern, PatternGrid, voices};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use whip_prng::EngineRng;

pub const COMPONENT_ID: &str = "drummer";

/// Bars per phrase; the fill lands on the last beat of the last bar.
pub const PHRASE_BARS: u64 = 8;

/// First step of the fill (beat 4).
pub const FILL_START_STEP: usize = 12;

/// Humanizer voices for drums are `DRUM_VOICE_BASE + key`.
const DRUM_VOICE_BASE: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DrumVoice {
    Kick,
    Rim,
    Snare,
    Clap,
    ClosedHat,
    PedalHat,
    OpenHat,
    LowTom,
    MidTom,
    HighTom,
    Crash,
    Ride,
}

impl DrumVoice {
    /// General MIDI percussion key.
    pub fn key(self) -> u8 {
        match self {
            DrumVoice::Kick => 36,
            DrumVoice::Rim => 37,
            DrumVoice::Snare => 38,
            DrumVoice::Clap => 39,
            DrumVoice::ClosedHat => 42,
            DrumVoice::PedalHat => 44,
            DrumVoice::OpenHat => 46,
            DrumVoice::LowTom => 45,
            DrumVoice::MidTom => 47,
            DrumVoice::HighTom => 50,
            DrumVoice::Crash => 49,
            DrumVoice::Ride => 51,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DrumStyle {
    #[default]
    Rock,
    Funk,
    Jazz,
    HipHop,
    Electronic,
}

impl DrumStyle {
    pub const NAMES: [&'static str; 5] = ["rock", "funk", "jazz", "hiphop", "electronic"];

    pub fn parse(name: &str) -> DrumStyle {
        match name.trim().to_ascii_lowercase().as_str() {
            "rock" => DrumStyle::Rock,
            "funk" => DrumStyle::Funk,
            "jazz" => DrumStyle::Jazz,
            "hiphop" | "hip-hop" => DrumStyle::HipHop,
            "electronic" => DrumStyle::Electronic,
            other => {
                warn!(style = other, "unknown drum style, using rock");
                DrumStyle::Rock
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DrumStyle::Rock => "rock",
            DrumStyle::Funk => "funk",
            DrumStyle::Jazz => "jazz",
            DrumStyle::HipHop => "hiphop",
            DrumStyle::Electronic => "electronic",
        }
    }

    pub fn pattern(self) -> DensityPattern<DrumVoice> {
        use DrumVoice::*;
        match self {
            DrumStyle::Rock => DensityPattern::new(voices(&[
                (Kick, "X.......x.x....."),
                (Snare, "....X.......X..."),
                (ClosedHat, "x.o.x.o.x.o.x.o."),
            ]))
            .with_layer(0.25, voices(&[(ClosedHat, ".g.g.g.g.g.g.g.g")]))
            .with_layer(0.5, voices(&[(Kick, "......o.......o."), (Snare, "..g....g...g..g.")]))
            .with_layer(0.75, voices(&[(OpenHat, ".......o.......o"), (Crash, "X...............")])),

            DrumStyle::Funk => DensityPattern::new(voices(&[
                (Kick, "X..x..x...x....."),
                (Snare, "....X.......X..."),
                (ClosedHat, "xoxoxoxoxoxoxoxo"),
            ]))
            .with_layer(0.3, voices(&[(Snare, "..g..g.g.g...g.g")]))
            .with_layer(0.6, voices(&[(Kick, ".....o.......o.."), (OpenHat, "..o.......o.....")]))
            .with_layer(0.85, voices(&[(Clap, "....x.......x..."), (Rim, ".......g.......g")])),

            DrumStyle::Jazz => DensityPattern::new(voices(&[
                (Ride, "x...x..ox...x..o"),
                (PedalHat, "....x.......x..."),
            ]))
            .with_layer(0.3, voices(&[(Kick, "g...g...g...g...")]))
            .with_layer(0.55, voices(&[(Snare, "......g....g...g")]))
            .with_layer(0.8, voices(&[(Snare, "..o.......o....."), (Kick, ".......o........")])),

            DrumStyle::HipHop => DensityPattern::new(voices(&[
                (Kick, "X......x..x....."),
                (Snare, "....X.......X..."),
                (ClosedHat, "x.x.x.x.x.x.x.x."),
            ]))
            .with_layer(0.3, voices(&[(ClosedHat, ".g.g.g.g.g.g.g.g")]))
            .with_layer(0.6, voices(&[(Kick, "...........o..o.")]))
            .with_layer(0.8, voices(&[(Clap, "....x.......x..."), (Rim, "..g.......g.....")])),

            DrumStyle::Electronic => DensityPattern::new(voices(&[
                (Kick, "X...x...x...x..."),
                (Clap, "....x.......x..."),
                (OpenHat, "..o...o...o...o."),
            ]))
            .with_layer(0.25, voices(&[(ClosedHat, "x.x.x.x.x.x.x.x.")]))
            .with_layer(0.5, voices(&[(ClosedHat, ".g.g.g.g.g.g.g.g")]))
            .with_layer(0.75, voices(&[(Kick, "..............o."), (Snare, "............gox")])),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FillIntensity {
    Light,
    Medium,
    Heavy,
}

impl FillIntensity {
    pub fn for_density(density: f64) -> FillIntensity {
        if density < 0.35 {
            FillIntensity::Light
        } else if density < 0.7 {
            FillIntensity::Medium
        } else {
            FillIntensity::Heavy
        }
    }

    /// Fills for this bucket. Only steps 12..16 are used.
    pub fn catalog(self) -> Vec<PatternGrid<DrumVoice>> {
        use DrumVoice::*;
        let rows: &[&[(DrumVoice, &str)]] = match self {
            FillIntensity::Light => &[
                &[(Kick, "............x..."), (Snare, "..............x.")],
                &[(Snare, "............x.x."), (ClosedHat, "............x.x.")],
                &[(Snare, "..............gx")],
            ],
            FillIntensity::Medium => &[
                &[(Snare, "............xxx."), (LowTom, "...............x")],
                &[(HighTom, "............xx.."), (MidTom, "..............xx")],
                &[(Snare, "............x.xx"), (Kick, "............x...")],
            ],
            FillIntensity::Heavy => &[
                &[(Snare, "............XxXx"), (Kick, "............x.x."), (Crash, "...............X")],
                &[(HighTom, "............Xx.."), (MidTom, "..............Xx"), (LowTom, "...............x")],
                &[(Snare, "............xxxx"), (LowTom, "............o.o."), (Crash, "............X...")],
            ],
        };
        rows.iter().map(|r| PatternGrid::from_voices(voices(r))).collect()
    }
}

#[derive(Debug, Clone)]
struct CachedFill {
    bar: u64,
    grid: PatternGrid<DrumVoice>,
}

#[derive(Debug, Clone)]
pub struct Drummer {
    params: ParameterSet,
    style: DrumStyle,
    density: f64,
    fills_enabled: bool,
    channel: u8,
    rng: EngineRng,
    pattern: DensityPattern<DrumVoice>,
    grid: PatternGrid<DrumVoice>,
    fill: Option<CachedFill>,
}

impl Drummer {
    pub fn new(settings: &RhythmConfig, channel: u8, rng: EngineRng) -> Self {
        let mut params = ParameterSet::new();
        params.register("density", ParameterKind::number(0.0, 1.0));
        params.register("style", ParameterKind::select(&DrumStyle::NAMES));
        params.register("regenerate", ParameterKind::Pulse);
        params.register("fills", ParameterKind::select(&["off", "on"]));

        let style = DrumStyle::parse(&settings.drum_style);
        let mut drummer = Drummer {
            params,
            style,
            density: settings.density.clamp(0.0, 1.0),
            fills_enabled: settings.fills,
            channel: channel.min(15),
            rng,
            pattern: style.pattern(),
            grid: PatternGrid::default(),
            fill: None,
        };
        drummer.regenerate();
        drummer
    }

    pub fn style(&self) -> DrumStyle {
        self.style
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn fills_enabled(&self) -> bool {
        self.fills_enabled
    }

    pub fn density_pattern(&self) -> &DensityPattern<DrumVoice> {
        &self.pattern
    }

    /// The grid currently being played.
    pub fn grid(&self) -> &PatternGrid<DrumVoice> {
        &self.grid
    }

    pub fn set_style(&mut self, style: DrumStyle) {
        if style != self.style {
            self.style = style;
            self.pattern = style.pattern();
            self.regenerate();
        }
    }

    pub fn set_density(&mut self, density: f64) {
        if !density.is_finite() {
            return;
        }
        let density = density.clamp(0.0, 1.0);
        if density != self.density {
            self.density = density;
            self.regenerate();
        }
    }

    pub fn set_fills(&mut self, enabled: bool) {
        self.fills_enabled = enabled;
        if !enabled {
            self.fill = None;
        }
    }

    /// Full resynthesis at the current density.
    pub fn regenerate(&mut self) {
        self.grid = self.pattern.generate(self.density, &mut self.rng);
        debug!(
            style = self.style.name(),
            density = self.density,
            hits = self.grid.hit_count(),
            "drum pattern regenerated"
        );
    }

    pub fn is_fill_step(&self, bar: u64, step: usize) -> bool {
        self.fills_enabled && bar % PHRASE_BARS == PHRASE_BARS - 1 && step >= FILL_START_STEP
    }

    /// Notes for one sixteenth step.
    pub fn on_step(&mut self, bar: u64, step: usize, clock: &Clock) -> Vec<NoteRequest> {
        let step = step % STEPS_PER_BAR;
        let hits = if self.is_fill_step(bar, step) {
            if self.fill.as_ref().is_none_or(|f| f.bar != bar) {
                let intensity = FillIntensity::for_density(self.density);
                let catalog = intensity.catalog();
                let idx = self.rng.range_usize(0, catalog.len());
                let grid = catalog.into_iter().nth(idx).unwrap_or_default();
                debug!(bar, ?intensity, "fill selected");
                self.fill = Some(CachedFill { bar, grid });
            }
            let hits = self.fill.as_ref().map(|f| f.grid.hits_at(step)).unwrap_or_default();
            if step == STEPS_PER_BAR - 1 {
                self.fill = None;
            }
            hits
        } else {
            self.grid.hits_at(step)
        };

        hits.into_iter()
            .map(|(voice, velocity)| NoteRequest {
                channel: self.channel,
                note: voice.key(),
                velocity,
                duration_ticks: clock.ticks_per_step(),
                voice: DRUM_VOICE_BASE + voice.key() as u32,
                strong_beat: Clock::is_strong_step(step),
            })
            .collect()
    }

    pub fn has_cached_fill(&self) -> bool {
        self.fill.is_some()
    }
}

impl ParameterTarget for Drummer {
    fn component_id(&self) -> &str {
        COMPONENT_ID
    }

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn set_parameter(&mut self, id: &str, value: &ParameterValue) -> bool {
        let Some(value) = self.params.validate(id, value) else {
            return false;
        };
        match (id, &value) {
            ("density", ParameterValue::Number(d)) => self.set_density(*d),
            ("style", ParameterValue::Select(s)) => self.set_style(DrumStyle::parse(s)),
            ("regenerate", ParameterValue::Pulse) => self.regenerate(),
            ("fills", ParameterValue::Select(s)) => self.set_fills(s == "on"),
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drummer(style: &str, density: f64) -> Drummer {
        let settings = RhythmConfig {
            drum_style: style.to_string(),
            density,
            ..RhythmConfig::default()
        };
        Drummer::new(&settings, 9, EngineRng::new(42))
    }

    #[test]
    fn rock_density_zero_is_base() {
        let d = drummer("rock", 0.0);
        let base = PatternGrid::from_voices(DrumStyle::Rock.pattern().base);
        assert_eq!(d.grid(), &base);
    }

    #[test]
    fn every_style_has_positive_thresholds() {
        for name in DrumStyle::NAMES {
            let pattern = DrumStyle::parse(name).pattern();
            assert!(pattern.layers().iter().all(|l| l.threshold > 0.0), "{name}");
        }
    }

    #[test]
    fn unknown_style_falls_back_to_rock() {
        assert_eq!(DrumStyle::parse("polka"), DrumStyle::Rock);
        assert_eq!(drummer("polka", 0.3).style(), DrumStyle::Rock);
    }

    #[test]
    fn expected_hits_grow_with_density() {
        for name in DrumStyle::NAMES {
            let pattern = DrumStyle::parse(name).pattern();
            let mut prev = 0.0;
            for i in 0..=20 {
                let e = pattern.expected_hits(i as f64 / 20.0);
                assert!(e + 1e-9 >= prev, "{name} at {i}");
                prev = e;
            }
        }
    }

    #[test]
    fn downbeat_kick_on_drum_channel() {
        let mut d = drummer("rock", 0.0);
        let clock = Clock::default();
        let notes = d.on_step(0, 0, &clock);
        let kick = notes.iter().find(|n| n.note == 36).unwrap();
        assert_eq!(kick.channel, 9);
        assert!(kick.strong_beat);
        assert_eq!(kick.duration_ticks, clock.ticks_per_step());
    }

    #[test]
    fn fill_cached_for_one_beat_then_cleared() {
        let mut d = drummer("rock", 0.9);
        let clock = Clock::default();
        assert!(!d.is_fill_step(6, 12));
        assert!(d.is_fill_step(7, 12));
        d.on_step(7, 12, &clock);
        assert!(d.has_cached_fill());
        d.on_step(7, 13, &clock);
        d.on_step(7, 14, &clock);
        assert!(d.has_cached_fill());
        d.on_step(7, 15, &clock);
        assert!(!d.has_cached_fill());
    }

    #[test]
    fn fills_can_be_disabled() {
        let mut d = drummer("rock", 0.9);
        assert!(d.set_parameter("fills", &ParameterValue::Select("off".into())));
        assert!(!d.is_fill_step(7, 14));
    }

    #[test]
    fn fill_buckets() {
        assert_eq!(FillIntensity::for_density(0.1), FillIntensity::Light);
        assert_eq!(FillIntensity::for_density(0.35), FillIntensity::Medium);
        assert_eq!(FillIntensity::for_density(0.7), FillIntensity::Heavy);
        for bucket in [FillIntensity::Light, FillIntensity::Medium, FillIntensity::Heavy] {
            for fill in bucket.catalog() {
                assert!(fill.hit_count() > 0);
                assert!((0..FILL_START_STEP).all(|s| fill.hits_at(s).is_empty()));
            }
        }
    }

    #[test]
    fn parameters_drive_state() {
        let mut d = drummer("rock", 0.0);
        assert!(d.set_parameter("density", &ParameterValue::Number(0.8)));
        assert_eq!(d.density(), 0.8);
        assert!(d.set_parameter("style", &ParameterValue::Select("funk".into())));
        assert_eq!(d.style(), DrumStyle::Funk);
        assert!(d.set_parameter("regenerate", &ParameterValue::Pulse));
        assert!(!d.set_parameter("tempo", &ParameterValue::Number(1.0)));
        assert!(!d.set_parameter("style", &ParameterValue::Select("polka".into())));
    }
}
