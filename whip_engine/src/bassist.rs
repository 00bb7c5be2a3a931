// Bassist: density-layered bass lines over the current progression.
//
// Uses the same density machinery as the drummer (pattern.rs), but its
// voices are harmonic roles instead of drums:
//
//   Root      the current chord's root in the bass octave
//   Fifth     a fifth above, snapped to the pool
//   Octave    the root an octave up
//   Approach  the pool note just below the next chord's root, leading into
//             the change
//
// Roles are resolved to MIDI notes at play time against the current and next
// chord, so a pattern generated once follows every chord change. With no
// chord yet the tonic stands in for the root. The line is monophonic: when
// several roles hit the same step the latest-declared role wins.

use crate::chord::Chord;
use crate::clock::{Clock, STEPS_PER_BAR};
use crate::config::RhythmConfig;
use crate::output::NoteRequest;
use crate::param::{ParameterKind, ParameterSet, ParameterTarget, ParameterValue};
use crate::pattern::{DensityPattern, PatternGrid, voices};
use crate::pool::HarmonicPoolService;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use whip_prng::EngineRng;

pub const COMPONENT_ID: &str = "bassist";

pub const MIN_OCTAVE: u8 = 1;
pub const MAX_OCTAVE: u8 = 3;

/// Humanizer voice shared by every bass note.
const BASS_VOICE: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BassVoice {
    Root,
    Fifth,
    Octave,
    Approach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BassStyle {
    #[default]
    Rock,
    Funk,
    Walking,
    Electronic,
}

impl BassStyle {
    pub const NAMES: [&'static str; 4] = ["rock", "funk", "walking", "electronic"];

    pub fn parse(name: &str) -> BassStyle {
        match name.trim().to_ascii_lowercase().as_str() {
            "rock" => BassStyle::Rock,
            "funk" => BassStyle::Funk,
            "walking" | "jazz" => BassStyle::Walking,
            "electronic" => BassStyle::Electronic,
            other => {
                warn!(style = other, "unknown bass style, using rock");
                BassStyle::Rock
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BassStyle::Rock => "rock",
            BassStyle::Funk => "funk",
            BassStyle::Walking => "walking",
            BassStyle::Electronic => "electronic",
        }
    }

    /// Sounding length of each note, in sixteenth steps.
    pub fn note_steps(self) -> u64 {
        match self {
            BassStyle::Rock | BassStyle::Electronic => 2,
            BassStyle::Funk => 1,
            BassStyle::Walking => 4,
        }
    }

    pub fn pattern(self) -> DensityPattern<BassVoice> {
        use BassVoice::*;
        match self {
            BassStyle::Rock => DensityPattern::new(voices(&[(Root, "X.......x.......")]))
                .with_layer(0.2, voices(&[(Root, "....o.......o...")]))
                .with_layer(0.45, voices(&[(Root, "..o...o...o...o.")]))
                .with_layer(0.7, voices(&[(Octave, "......x.......x.")]))
                .with_layer(0.85, voices(&[(Approach, "..............x.")])),

            BassStyle::Funk => DensityPattern::new(voices(&[(Root, "X......x..x.....")]))
                .with_layer(0.3, voices(&[(Octave, "...x.......x....")]))
                .with_layer(0.55, voices(&[(Fifth, ".....o.......o.."), (Root, "..g.....g.......")]))
                .with_layer(0.8, voices(&[(Approach, "...............x")])),

            BassStyle::Walking => DensityPattern::new(voices(&[
                (Root, "X..............."),
                (Octave, "....x..........."),
                (Fifth, "........x......."),
                (Approach, "............x..."),
            ]))
            .with_layer(0.5, voices(&[(Root, "..........g.....")]))
            .with_layer(0.8, voices(&[(Approach, "..............o.")])),

            BassStyle::Electronic => DensityPattern::new(voices(&[(Root, "..x...x...x...x.")]))
                .with_layer(0.3, voices(&[(Octave, "...x.......x....")]))
                .with_layer(0.6, voices(&[(Root, "x.......x.......")]))
                .with_layer(0.85, voices(&[(Fifth, ".......o.......o")])),
        }
    }
}

/// MIDI note for a bass role.
pub fn resolve_voice(
    voice: BassVoice,
    current: Option<&Chord>,
    next: Option<&Chord>,
    pool: &HarmonicPoolService,
    octave: u8,
) -> u8 {
    let base = 12 * (octave.clamp(MIN_OCTAVE, MAX_OCTAVE) + 1);
    let root_pc = current.map_or(pool.tonic() % 12, |c| c.root % 12);
    let root = base + root_pc;
    match voice {
        BassVoice::Root => root,
        BassVoice::Fifth => pool.nearest_pool_note(root + 7),
        BassVoice::Octave => root + 12,
        BassVoice::Approach => {
            let target = base + next.map_or(root_pc, |c| c.root % 12);
            (1..=2)
                .map(|d| target - d)
                .find(|&n| pool.pool().contains(n))
                .unwrap_or(target - 1)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bassist {
    params: ParameterSet,
    style: BassStyle,
    density: f64,
    octave: u8,
    channel: u8,
    rng: EngineRng,
    pattern: DensityPattern<BassVoice>,
    grid: PatternGrid<BassVoice>,
}

impl Bassist {
    pub fn new(settings: &RhythmConfig, channel: u8, rng: EngineRng) -> Self {
        let mut params = ParameterSet::new();
        params.register("density", ParameterKind::number(0.0, 1.0));
        params.register("style", ParameterKind::select(&BassStyle::NAMES));
        params.register("regenerate", ParameterKind::Pulse);
        params.register(
            "octave",
            ParameterKind::number(MIN_OCTAVE as f64, MAX_OCTAVE as f64),
        );

        let style = BassStyle::parse(&settings.bass_style);
        let mut bassist = Bassist {
            params,
            style,
            density: settings.density.clamp(0.0, 1.0),
            octave: settings.bass_octave.clamp(MIN_OCTAVE, MAX_OCTAVE),
            channel: channel.min(15),
            rng,
            pattern: style.pattern(),
            grid: PatternGrid::default(),
        };
        bassist.regenerate();
        bassist
    }

    pub fn style(&self) -> BassStyle {
        self.style
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn octave(&self) -> u8 {
        self.octave
    }

    pub fn grid(&self) -> &PatternGrid<BassVoice> {
        &self.grid
    }

    pub fn set_style(&mut self, style: BassStyle) {
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

    pub fn set_octave(&mut self, octave: f64) {
        if octave.is_finite() {
            self.octave = (octave.round() as u8).clamp(MIN_OCTAVE, MAX_OCTAVE);
        }
    }

    pub fn regenerate(&mut self) {
        self.grid = self.pattern.generate(self.density, &mut self.rng);
        debug!(
            style = self.style.name(),
            density = self.density,
            hits = self.grid.hit_count(),
            "bass pattern regenerated"
        );
    }

    /// The note for one sixteenth step, if any.
    pub fn on_step(
        &mut self,
        step: usize,
        clock: &Clock,
        current: Option<&Chord>,
        next: Option<&Chord>,
        pool: &HarmonicPoolService,
    ) -> Option<NoteRequest> {
        let step = step % STEPS_PER_BAR;
        let (voice, velocity) = self.grid.hits_at(step).into_iter().last()?;
        Some(NoteRequest {
            channel: self.channel,
            note: resolve_voice(voice, current, next, pool, self.octave),
            velocity,
            duration_ticks: clock.ticks_per_step() * self.style.note_steps(),
            voice: BASS_VOICE,
            strong_beat: Clock::is_strong_step(step),
        })
    }
}

impl ParameterTarget for Bassist {
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
            ("style", ParameterValue::Select(s)) => self.set_style(BassStyle::parse(s)),
            ("regenerate", ParameterValue::Pulse) => self.regenerate(),
            ("octave", ParameterValue::Number(o)) => self.set_octave(*o),
            _ => return false,
        }
        true
    }
}
