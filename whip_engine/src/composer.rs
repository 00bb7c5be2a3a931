// Composer: chord progressions and their timing.
//
// A progression is a finite cyclic list of diatonic chords built against the
// current tonic centre. It comes from one of two sources:
//
// - **Template**: a fixed degree sequence (pop I-V-vi-IV, fifties, 12-bar
//   blues, ii-V-I turnaround, canon), cycled or truncated to the length.
// - **Probabilistic**: start on degree 1; each next degree is drawn with
//   weight `function_weight(from, to) × role_weight(to) × style(from, to)`,
//   where functions are tonic (I iii vi), subdominant (ii IV) and dominant
//   (V vii). Styles only scale individual `(from, to)` transitions, so an
//   unknown style is simply the neutral table. If every weight is zero the
//   draw is uniform.
//
// Every chord is built on the tonic centre current at generation time.
// Steps choose degrees only; the tonic moves when the pool service changes
// centre, which regenerates the progression.
//
// Chord qualities come from stacking pool thirds; jazz adds sevenths and
// blues turns major chords into dominant sevenths.
//
// State machine: `Idle` (nothing generated) → `Generated` (a fresh
// progression waiting for its first bar line) → `Advancing`. Chord 0 sounds
// as soon as a progression is generated. Every boundary,
// `tick % (ticks_per_bar × bars_per_chord) == 0`, moves the index on
// cyclically, except the boundary the progression was generated on. Each
// change publishes `music:chord` and `music:nextChord`.
//
// A style, length or template change, a `regenerate` pulse, or a new tonic
// centre (seen through the pool service's generation counter) regenerates
// the whole progression on the next tick.

use crate::bus::{EventBus, topics};
use crate::chord::{Chord, ChordQuality, VoicingStyle};
use crate::clock::Clock;
use crate::config::HarmonyConfig;
use crate::param::{ParameterKind, ParameterSet, ParameterTarget, ParameterValue};
use crate::pool::{HarmonicPoolService, TonicCenter, note_name};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use whip_prng::EngineRng;

pub const COMPONENT_ID: &str = "composer";

pub const MIN_LENGTH: usize = 1;
pub const MAX_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Harmonic function tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarmonicFunction {
    Tonic,
    Subdominant,
    Dominant,
}

impl HarmonicFunction {
    pub fn of_degree(degree: u8) -> HarmonicFunction {
        match degree {
            2 | 4 => HarmonicFunction::Subdominant,
            5 | 7 => HarmonicFunction::Dominant,
            _ => HarmonicFunction::Tonic,
        }
    }

    /// Transition weight between functions.
    pub fn transition_weight(self, to: HarmonicFunction) -> f64 {
        use HarmonicFunction::*;
        match (self, to) {
            (Tonic, Tonic) => 0.2,
            (Tonic, Subdominant) => 0.45,
            (Tonic, Dominant) => 0.35,
            (Subdominant, Tonic) => 0.15,
            (Subdominant, Subdominant) => 0.2,
            (Subdominant, Dominant) => 0.65,
            (Dominant, Tonic) => 0.75,
            (Dominant, Subdominant) => 0.1,
            (Dominant, Dominant) => 0.15,
        }
    }
}

/// How strongly a degree represents its function.
fn role_weight(degree: u8) -> f64 {
    match degree {
        1 => 0.5,
        6 => 0.35,
        3 => 0.15,
        4 => 0.6,
        2 => 0.4,
        5 => 0.8,
        7 => 0.2,
        _ => 0.0,
    }
}

/// Staying on the same degree is allowed but discouraged.
const REPEAT_PENALTY: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressionStyle {
    #[default]
    Pop,
    Jazz,
    Blues,
    Classical,
    Modal,
    /// Multipliers all 1; used for unrecognized style names.
    Neutral,
}

impl ProgressionStyle {
    pub const NAMES: [&'static str; 5] = ["pop", "jazz", "blues", "classical", "modal"];

    pub fn parse(name: &str) -> ProgressionStyle {
        match name.trim().to_ascii_lowercase().as_str() {
            "pop" => ProgressionStyle::Pop,
            "jazz" => ProgressionStyle::Jazz,
            "blues" => ProgressionStyle::Blues,
            "classical" => ProgressionStyle::Classical,
            "modal" => ProgressionStyle::Modal,
            "neutral" => ProgressionStyle::Neutral,
            other => {
                warn!(style = other, "unknown progression style, using neutral weights");
                ProgressionStyle::Neutral
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProgressionStyle::Pop => "pop",
            ProgressionStyle::Jazz => "jazz",
            ProgressionStyle::Blues => "blues",
            ProgressionStyle::Classical => "classical",
            ProgressionStyle::Modal => "modal",
            ProgressionStyle::Neutral => "neutral",
        }
    }

    /// Whether chords get a fourth (seventh) tone.
    pub fn sevenths(self) -> bool {
        matches!(self, ProgressionStyle::Jazz | ProgressionStyle::Blues)
    }

    /// Whether major chords become dominant sevenths.
    pub fn dominant_on_major(self) -> bool {
        self == ProgressionStyle::Blues
    }

    /// Style emphasis on one degree transition.
    pub fn multiplier(self, from: u8, to: u8) -> f64 {
        match self {
            ProgressionStyle::Pop => match (from, to) {
                (_, 7) => 0.3,
                (1, 6) => 1.5,
                (6, 4) => 1.8,
                (4, 1) | (4, 5) => 1.3,
                (5, 6) => 1.2,
                _ => 1.0,
            },
            ProgressionStyle::Jazz => match (from, to) {
                (2, 5) => 2.5,
                (5, 1) => 2.0,
                (6, 2) => 1.8,
                (1, 6) | (3, 6) => 1.5,
                _ => 1.0,
            },
            ProgressionStyle::Blues => match (from, to) {
                (1, 4) | (4, 1) => 2.0,
                (5, 4) => 1.8,
                (5, 1) => 1.5,
                (_, 2 | 3 | 6 | 7) => 0.3,
                _ => 1.0,
            },
            ProgressionStyle::Classical => match (from, to) {
                (5, 1) => 2.0,
                (4, 5) | (2, 5) => 1.8,
                (7, 1) => 1.5,
                (5, 6) => 1.3,
                _ => 1.0,
            },
            ProgressionStyle::Modal => match (from, to) {
                (1, 7) | (7, 1) => 1.8,
                (1, 2) | (2, 1) => 1.5,
                (_, 5) => 0.5,
                _ => 1.0,
            },
            ProgressionStyle::Neutral => 1.0,
        }
    }

    /// Weights for degrees 1..=7 following `from`.
    pub fn next_degree_weights(self, from: u8) -> [f64; 7] {
        let from_fn = HarmonicFunction::of_degree(from);
        let mut weights = [0.0; 7];
        for (i, w) in weights.iter_mut().enumerate() {
            let to = i as u8 + 1;
            let mut weight = from_fn.transition_weight(HarmonicFunction::of_degree(to))
                * role_weight(to)
                * self.multiplier(from, to);
            if to == from {
                weight *= REPEAT_PENALTY;
            }
            *w = weight;
        }
        weights
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressionTemplate {
    Pop,
    Fifties,
    Blues,
    Turnaround,
    Canon,
}

impl ProgressionTemplate {
    /// Option list for the `template` select parameter.
    pub const OPTIONS: [&'static str; 6] = ["none", "pop", "fifties", "blues", "turnaround", "canon"];

    pub fn parse(name: &str) -> Option<ProgressionTemplate> {
        match name.trim().to_ascii_lowercase().as_str() {
            "pop" => Some(ProgressionTemplate::Pop),
            "fifties" => Some(ProgressionTemplate::Fifties),
            "blues" => Some(ProgressionTemplate::Blues),
            "turnaround" => Some(ProgressionTemplate::Turnaround),
            "canon" => Some(ProgressionTemplate::Canon),
            "" | "none" => None,
            other => {
                warn!(template = other, "unknown progression template, selecting probabilistically");
                None
            }
        }
    }

    pub fn degrees(self) -> &'static [u8] {
        match self {
            ProgressionTemplate::Pop => &[1, 5, 6, 4],
            ProgressionTemplate::Fifties => &[1, 6, 4, 5],
            ProgressionTemplate::Blues => &[1, 1, 1, 1, 4, 4, 1, 1, 5, 4, 1, 5],
            ProgressionTemplate::Turnaround => &[2, 5, 1, 1],
            ProgressionTemplate::Canon => &[1, 5, 6, 3, 4, 1, 4, 5],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProgressionTemplate::Pop => "pop",
            ProgressionTemplate::Fifties => "fifties",
            ProgressionTemplate::Blues => "blues",
            ProgressionTemplate::Turnaround => "turnaround",
            ProgressionTemplate::Canon => "canon",
        }
    }
}

/// Build a progression of `length` chords (clamped to [1, 64]) starting on
/// degree 1 of `center`.
pub fn generate_progression(
    center: &TonicCenter,
    style: ProgressionStyle,
    template: Option<ProgressionTemplate>,
    length: usize,
    rng: &mut EngineRng,
) -> Vec<Chord> {
    let length = length.clamp(MIN_LENGTH, MAX_LENGTH);
    let degrees: Vec<u8> = match template {
        Some(t) => t.degrees().iter().copied().cycle().take(length).collect(),
        None => {
            let mut degrees = Vec::with_capacity(length);
            let mut degree = 1u8;
            degrees.push(degree);
            while degrees.len() < length {
                let weights = style.next_degree_weights(degree);
                degree = rng.weighted_index(&weights).map_or(1, |i| i as u8 + 1);
                degrees.push(degree);
            }
            degrees
        }
    };
    degrees
        .into_iter()
        .map(|d| center.diatonic_chord(d, style.sevenths(), style.dominant_on_major()))
        .collect()
}

// ---------------------------------------------------------------------------
// Bus payload
// ---------------------------------------------------------------------------

/// Payload of `music:chord` and `music:nextChord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordMessage {
    /// Display name such as "Dm7".
    pub chord: String,
    pub root: u8,
    pub root_name: String,
    pub quality: ChordQuality,
    pub voicing: Vec<u8>,
    pub degree: u8,
    pub progression_index: usize,
    pub progression_length: usize,
}

impl ChordMessage {
    pub fn new(chord: &Chord, voicing: Vec<u8>, index: usize, length: usize) -> Self {
        ChordMessage {
            chord: chord.name(),
            root: chord.root,
            root_name: note_name(chord.root),
            quality: chord.quality,
            voicing,
            degree: chord.degree,
            progression_index: index,
            progression_length: length,
        }
    }
}

// ---------------------------------------------------------------------------
// Composer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComposerState {
    Idle,
    Generated,
    Advancing,
}

#[derive(Debug, Clone)]
pub struct Composer {
    params: ParameterSet,
    style: ProgressionStyle,
    template: Option<ProgressionTemplate>,
    length: usize,
    bars_per_chord: u64,
    progression: Vec<Chord>,
    index: usize,
    state: ComposerState,
    rng: EngineRng,
    regenerate_requested: bool,
    /// Pool-service generation the progression was built against.
    built_for: Option<u64>,
}

impl Composer {
    pub fn new(settings: &HarmonyConfig, rng: EngineRng) -> Self {
        let mut params = ParameterSet::new();
        params.register("style", ParameterKind::select(&ProgressionStyle::NAMES));
        params.register("length", ParameterKind::number(2.0, 16.0));
        params.register("barsPerChord", ParameterKind::number(1.0, 4.0));
        params.register("regenerate", ParameterKind::Pulse);
        params.register("template", ParameterKind::select(&ProgressionTemplate::OPTIONS));

        Composer {
            params,
            style: ProgressionStyle::parse(&settings.style),
            template: settings.template.as_deref().and_then(ProgressionTemplate::parse),
            length: settings.progression_length.clamp(MIN_LENGTH, MAX_LENGTH),
            bars_per_chord: settings.bars_per_chord.clamp(1, 16),
            progression: Vec::new(),
            index: 0,
            state: ComposerState::Idle,
            rng,
            regenerate_requested: false,
            built_for: None,
        }
    }

    pub fn state(&self) -> ComposerState {
        self.state
    }

    pub fn style(&self) -> ProgressionStyle {
        self.style
    }

    pub fn template(&self) -> Option<ProgressionTemplate> {
        self.template
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn bars_per_chord(&self) -> u64 {
        self.bars_per_chord
    }

    pub fn progression(&self) -> &[Chord] {
        &self.progression
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_chord(&self) -> Option<&Chord> {
        self.progression.get(self.index)
    }

    pub fn next_chord(&self) -> Option<&Chord> {
        if self.progression.is_empty() {
            return None;
        }
        self.progression.get((self.index + 1) % self.progression.len())
    }

    pub fn set_style(&mut self, style: ProgressionStyle) {
        if style != self.style {
            self.style = style;
            self.regenerate_requested = true;
        }
    }

    pub fn set_template(&mut self, template: Option<ProgressionTemplate>) {
        if template != self.template {
            self.template = template;
            self.regenerate_requested = true;
        }
    }

    pub fn set_length(&mut self, length: usize) {
        let length = length.clamp(MIN_LENGTH, MAX_LENGTH);
        if length != self.length {
            self.length = length;
            self.regenerate_requested = true;
        }
    }

    pub fn set_bars_per_chord(&mut self, bars: u64) {
        self.bars_per_chord = bars.clamp(1, 16);
    }

    pub fn request_regeneration(&mut self) {
        self.regenerate_requested = true;
    }

    fn needs_regeneration(&self, pool: &HarmonicPoolService) -> bool {
        self.state == ComposerState::Idle
            || self.regenerate_requested
            || self.built_for != Some(pool.generation())
    }

    /// Build a fresh progression against the pool service's centre and
    /// restart at its first chord.
    pub fn generate(&mut self, pool: &HarmonicPoolService) -> &[Chord] {
        self.progression = generate_progression(
            pool.center(),
            self.style,
            self.template,
            self.length,
            &mut self.rng,
        );
        self.index = 0;
        self.state = ComposerState::Generated;
        self.regenerate_requested = false;
        self.built_for = Some(pool.generation());
        let names: Vec<String> = self.progression.iter().map(Chord::name).collect();
        info!(
            style = self.style.name(),
            template = self.template.map(ProgressionTemplate::name),
            progression = %names.join(" "),
            "progression generated"
        );
        &self.progression
    }

    /// Ticks per chord.
    pub fn chord_period(&self, clock: &Clock) -> u64 {
        (clock.ticks_per_bar() * self.bars_per_chord).max(1)
    }

    /// Ticks from `tick` until the next chord boundary.
    pub fn ticks_until_change(&self, tick: u64, clock: &Clock) -> u64 {
        let period = self.chord_period(clock);
        period - tick % period
    }

    /// Process one tick; returns the new current chord if it changed.
    pub fn on_tick(
        &mut self,
        tick: u64,
        clock: &Clock,
        pool: &HarmonicPoolService,
        bus: &mut EventBus,
    ) -> Option<Chord> {
        let regenerated = self.needs_regeneration(pool);
        if regenerated {
            self.generate(pool);
        }
        let mut changed = regenerated;

        if tick % self.chord_period(clock) == 0 {
            match self.state {
                ComposerState::Generated => {
                    self.state = ComposerState::Advancing;
                    if !regenerated && !self.progression.is_empty() {
                        self.index = (self.index + 1) % self.progression.len();
                    }
                    changed = true;
                }
                ComposerState::Advancing if !self.progression.is_empty() => {
                    self.index = (self.index + 1) % self.progression.len();
                    changed = true;
                }
                _ => {}
            }
        }

        if !changed {
            return None;
        }
        self.publish(pool, bus);
        let chord = self.current_chord().cloned();
        if let Some(c) = &chord {
            debug!(tick, chord = %c, index = self.index, "chord change");
        }
        chord
    }

    /// Publish the current and next chord, voiced by the pool service.
    pub fn publish(&self, pool: &HarmonicPoolService, bus: &mut EventBus) {
        let len = self.progression.len();
        if let Some(current) = self.current_chord() {
            let voicing = pool.voice_chord(current, VoicingStyle::default());
            bus.publish_message(topics::MUSIC_CHORD, &ChordMessage::new(current, voicing, self.index, len));
        }
        if let Some(next) = self.next_chord() {
            let next_index = (self.index + 1) % len.max(1);
            let voicing = pool.voice_chord(next, VoicingStyle::default());
            bus.publish_message(topics::MUSIC_NEXT_CHORD, &ChordMessage::new(next, voicing, next_index, len));
        }
    }
}

impl ParameterTarget for Composer {
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
            ("style", ParameterValue::Select(s)) => self.set_style(ProgressionStyle::parse(s)),
            ("length", ParameterValue::Number(n)) => self.set_length(n.round() as usize),
            ("barsPerChord", ParameterValue::Number(n)) => self.set_bars_per_chord(n.round() as u64),
            ("regenerate", ParameterValue::Pulse) => self.request_regeneration(),
            ("template", ParameterValue::Select(s)) => self.set_template(ProgressionTemplate::parse(s)),
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;

    fn composer(style: &str, length: usize) -> Composer {
        let settings = HarmonyConfig {
            style: style.to_string(),
            progression_length: length,
            ..HarmonyConfig::default()
        };
        Composer::new(&settings, EngineRng::new(2024))
    }

    #[test]
    fn jazz_in_c_starts_on_tonic_and_cycles() {
        let pool = HarmonicPoolService::new();
        let clock = Clock::default();
        let mut bus = EventBus::new();
        let mut c = composer("jazz", 4);

        let first = c.on_tick(0, &clock, &pool, &mut bus).unwrap();
        assert_eq!(first.degree, 1);
        assert_eq!(first.root % 12, 0);
        assert_eq!(first.quality, ChordQuality::Major7);
        assert_eq!(c.index(), 0);
        assert_eq!(c.state(), ComposerState::Advancing);

        let bar = clock.ticks_per_bar();
        for i in 1..=4u64 {
            for t in (i - 1) * bar + 1..i * bar {
                assert!(c.on_tick(t, &clock, &pool, &mut bus).is_none());
            }
            assert!(c.on_tick(i * bar, &clock, &pool, &mut bus).is_some());
        }
        assert_eq!(c.index(), 0);
    }

    #[test]
    fn chord_messages_published() {
        let pool = HarmonicPoolService::new();
        let mut bus = EventBus::new();
        let mut c = composer("pop", 4);
        c.on_tick(0, &Clock::default(), &pool, &mut bus);
        let msg: ChordMessage = bus.last_message(topics::MUSIC_CHORD).unwrap();
        assert_eq!(msg.degree, 1);
        assert_eq!(msg.progression_length, 4);
        assert_eq!(msg.voicing, vec![60, 64, 67]);
        let next: ChordMessage = bus.last_message(topics::MUSIC_NEXT_CHORD).unwrap();
        assert_eq!(next.progression_index, 1);
        let next_chord = c.next_chord().unwrap();
        assert_eq!(next.voicing, pool.voice_chord(next_chord, VoicingStyle::Close));
    }

    #[test]
    fn templates_cycle_and_truncate() {
        let center = TonicCenter::new(Pool::natural(), 60);
        let mut rng = EngineRng::new(1);
        let pop = generate_progression(&center, ProgressionStyle::Pop, Some(ProgressionTemplate::Pop), 6, &mut rng);
        let degrees: Vec<u8> = pop.iter().map(|c| c.degree).collect();
        assert_eq!(degrees, vec![1, 5, 6, 4, 1, 5]);
        assert_eq!(pop[2].quality, ChordQuality::Minor);

        let blues = generate_progression(&center, ProgressionStyle::Blues, Some(ProgressionTemplate::Blues), 12, &mut rng);
        assert!(blues.iter().all(|c| c.quality == ChordQuality::Dominant7));

        let turn = generate_progression(&center, ProgressionStyle::Jazz, Some(ProgressionTemplate::Turnaround), 2, &mut rng);
        assert_eq!(turn[0].quality, ChordQuality::Minor7);
        assert_eq!(turn[1].quality, ChordQuality::Dominant7);
    }

    #[test]
    fn length_is_clamped() {
        let center = TonicCenter::new(Pool::natural(), 60);
        let mut rng = EngineRng::new(1);
        assert_eq!(generate_progression(&center, ProgressionStyle::Pop, None, 0, &mut rng).len(), 1);
        assert_eq!(generate_progression(&center, ProgressionStyle::Pop, None, 500, &mut rng).len(), MAX_LENGTH);
    }

    #[test]
    fn probabilistic_progressions_are_diatonic_and_deterministic() {
        let center = TonicCenter::new(Pool::from_key("2#"), 62);
        let a = generate_progression(&center, ProgressionStyle::Classical, None, 16, &mut EngineRng::new(5));
        let b = generate_progression(&center, ProgressionStyle::Classical, None, 16, &mut EngineRng::new(5));
        assert_eq!(a, b);
        assert_eq!(a[0].degree, 1);
        for chord in &a {
            assert!(chord.pitch_classes().iter().all(|&pc| center.pool.contains(pc)));
        }
    }

    #[test]
    fn unknown_style_is_neutral() {
        assert_eq!(ProgressionStyle::parse("baroque-metal"), ProgressionStyle::Neutral);
        for from in 1..=7 {
            for to in 1..=7 {
                assert_eq!(ProgressionStyle::Neutral.multiplier(from, to), 1.0);
            }
        }
    }

    #[test]
    fn dominant_resolves_home_most_often() {
        let w = ProgressionStyle::Neutral.next_degree_weights(5);
        let best = w
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i + 1);
        assert_eq!(best, Some(1));
    }

    #[test]
    fn tonic_change_regenerates() {
        let mut pool = HarmonicPoolService::new();
        let clock = Clock::default();
        let mut bus = EventBus::new();
        let mut c = composer("pop", 4);
        c.on_tick(0, &clock, &pool, &mut bus);
        c.on_tick(clock.ticks_per_bar(), &clock, &pool, &mut bus);
        assert_eq!(c.index(), 1);

        pool.set_pool_and_tonic("1#", 67, &mut bus);
        let chord = c.on_tick(clock.ticks_per_bar() + 5, &clock, &pool, &mut bus).unwrap();
        assert_eq!(c.index(), 0);
        assert_eq!(chord.root % 12, 7);
        assert_eq!(c.state(), ComposerState::Generated);
    }

    #[test]
    fn every_step_is_rooted_in_the_generation_centre() {
        let center = TonicCenter::new(Pool::from_key("2b"), 70);
        let mut rng = EngineRng::new(8);
        for name in ProgressionStyle::NAMES {
            let style = ProgressionStyle::parse(name);
            for chord in generate_progression(&center, style, None, 16, &mut rng) {
                assert_eq!(chord.root, center.degree_to_note(chord.degree), "{name}: {chord}");
            }
        }
    }

    #[test]
    fn mid_period_regeneration_advances_at_the_next_boundary() {
        let mut pool = HarmonicPoolService::new();
        let clock = Clock::default();
        let mut bus = EventBus::new();
        let mut c = composer("pop", 4);
        let period = c.chord_period(&clock);
        c.on_tick(0, &clock, &pool, &mut bus);

        pool.set_pool_and_tonic("2b", 70, &mut bus);
        c.on_tick(100, &clock, &pool, &mut bus);
        assert_eq!(c.index(), 0);
        for t in 101..2 * period {
            assert!(c.on_tick(t, &clock, &pool, &mut bus).is_none());
        }
        assert!(c.on_tick(2 * period, &clock, &pool, &mut bus).is_some());
        assert_eq!(c.index(), 1);
        assert_eq!(c.state(), ComposerState::Advancing);
        c.on_tick(3 * period, &clock, &pool, &mut bus);
        assert_eq!(c.index(), 2);
    }

    #[test]
    fn parameters_request_regeneration() {
        let pool = HarmonicPoolService::new();
        let clock = Clock::default();
        let mut bus = EventBus::new();
        let mut c = composer("pop", 4);
        c.on_tick(0, &clock, &pool, &mut bus);
        assert!(c.set_parameter("length", &ParameterValue::Number(7.6)));
        assert!(c.set_parameter("template", &ParameterValue::Select("canon".into())));
        c.on_tick(1, &clock, &pool, &mut bus);
        assert_eq!(c.progression().len(), 8);
        assert_eq!(c.template(), Some(ProgressionTemplate::Canon));
        assert!(c.set_parameter("barsPerChord", &ParameterValue::Number(2.0)));
        assert_eq!(c.chord_period(&clock), 2 * clock.ticks_per_bar());
        assert!(c.set_parameter("template", &ParameterValue::Select("none".into())));
        assert_eq!(c.template(), None);
    }

    #[test]
    fn ticks_until_change() {
        let c = composer("pop", 4);
        let clock = Clock::default();
        assert_eq!(c.ticks_until_change(0, &clock), 96);
        assert_eq!(c.ticks_until_change(90, &clock), 6);
    }
}
