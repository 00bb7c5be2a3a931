// Soloist: lookahead-shaped melodic phrases over the progression.
//
// On every chord change the soloist tries to plan a phrase of
// `phrase_length` eighth notes. Planning needs the current chord, the next
// chord and a non-empty data lookahead; with any of them missing it skips the
// phrase and plays the fallback instead.
//
// For note `i` at phrase position `p = i / n` the target pitch is a weighted
// sum of four pulls (weights renormalized to sum 1):
//
//   trend       the lookahead value at `p`, mapped onto the register
//   harmonic    the chord tone nearest the previous note: current-chord
//               tones in the first half, tones shared with (or belonging to)
//               the next chord in the second half
//   tension     an arc rising to its peak at 75% of the phrase and falling
//               after it
//   continuity  the previous note
//
// The target is clamped to the register and then quantized to the nearest
// chord tone, so quantization has the final say. The last note resolves to
// the next chord's root. Velocity follows the tension arc.
//
// Fallback: on each eighth, with probability `activity`, step from the last
// note to a nearby chord tone (strong beats always chord tones, weak beats
// sometimes a pool neighbour).

use crate::chord::Chord;
use crate::clock::{Clock, STEPS_PER_BAR};
use crate::config::{PhraseWeights, SoloConfig};
use crate::output::NoteRequest;
use crate::param::{ParameterKind, ParameterSet, ParameterTarget, ParameterValue};
use crate::playhead::Lookahead;
use crate::pool::{HarmonicPoolService, nearest_note};
use std::collections::VecDeque;
use tracing::debug;
use whip_prng::EngineRng;

pub const COMPONENT_ID: &str = "soloist";

/// Phrase position of the tension peak.
pub const TENSION_PEAK: f64 = 0.75;

const MIN_PHRASE: usize = 2;
const MAX_PHRASE: usize = 16;
const LOWEST_REGISTER: u8 = 36;
const HIGHEST_REGISTER: u8 = 108;

/// Steps between melody notes (eighth notes).
const STEP_INTERVAL: usize = 2;

const LEAD_VOICE: u32 = 3000;

/// Tension in [0, 1] at phrase position `p`.
pub fn tension_at(p: f64) -> f64 {
    let p = p.clamp(0.0, 1.0);
    if p <= TENSION_PEAK {
        p / TENSION_PEAK
    } else {
        (1.0 - p) / (1.0 - TENSION_PEAK)
    }
}

/// One planned melody note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhraseNote {
    pub note: u8,
    pub velocity: u8,
}

#[derive(Debug, Clone)]
pub struct Soloist {
    params: ParameterSet,
    phrase_length: usize,
    activity: f64,
    register_low: u8,
    register_high: u8,
    weights: PhraseWeights,
    channel: u8,
    rng: EngineRng,
    phrase: VecDeque<PhraseNote>,
    last_note: Option<u8>,
}

impl Soloist {
    pub fn new(settings: &SoloConfig, channel: u8, rng: EngineRng) -> Self {
        let mut params = ParameterSet::new();
        params.register("phraseLength", ParameterKind::number(MIN_PHRASE as f64, MAX_PHRASE as f64));
        params.register("activity", ParameterKind::number(0.0, 1.0));
        let register = ParameterKind::number(LOWEST_REGISTER as f64, HIGHEST_REGISTER as f64);
        params.register("registerLow", register.clone());
        params.register("registerHigh", register);
        for w in ["trendWeight", "harmonicWeight", "tensionWeight", "continuityWeight"] {
            params.register(w, ParameterKind::number(0.0, 1.0));
        }

        let mut soloist = Soloist {
            params,
            phrase_length: settings.phrase_length.clamp(MIN_PHRASE, MAX_PHRASE),
            activity: settings.activity.clamp(0.0, 1.0),
            register_low: LOWEST_REGISTER,
            register_high: HIGHEST_REGISTER,
            weights: settings.weights,
            channel: channel.min(15),
            rng,
            phrase: VecDeque::new(),
            last_note: None,
        };
        soloist.set_register(settings.register_low, settings.register_high);
        soloist
    }

    pub fn phrase_length(&self) -> usize {
        self.phrase_length
    }

    pub fn activity(&self) -> f64 {
        self.activity
    }

    pub fn register(&self) -> (u8, u8) {
        (self.register_low, self.register_high)
    }

    pub fn weights(&self) -> PhraseWeights {
        self.weights.normalized()
    }

    /// Notes still queued from the current phrase.
    pub fn pending_phrase(&self) -> Vec<PhraseNote> {
        self.phrase.iter().copied().collect()
    }

    pub fn last_note(&self) -> Option<u8> {
        self.last_note
    }

    /// Set the register, swapping the bounds if they arrive reversed.
    pub fn set_register(&mut self, low: u8, high: u8) {
        let low = low.clamp(LOWEST_REGISTER, HIGHEST_REGISTER);
        let high = high.clamp(LOWEST_REGISTER, HIGHEST_REGISTER);
        (self.register_low, self.register_high) = if low <= high { (low, high) } else { (high, low) };
    }

    fn register_mid(&self) -> f64 {
        (self.register_low as f64 + self.register_high as f64) / 2.0
    }

    fn clamp_to_register(&self, pitch: f64) -> u8 {
        pitch.round().clamp(self.register_low as f64, self.register_high as f64) as u8
    }

    /// Plan a phrase for a chord change. Returns false (and clears any old
    /// phrase) when the context needed for planning is missing.
    pub fn plan_phrase(
        &mut self,
        current: Option<&Chord>,
        next: Option<&Chord>,
        lookahead: Option<&Lookahead>,
        pool: &HarmonicPoolService,
    ) -> bool {
        self.phrase.clear();
        let (Some(current), Some(next), Some(lookahead)) = (current, next, lookahead) else {
            debug!("phrase context missing, using fallback");
            return false;
        };
        if lookahead.data_points.is_empty() {
            debug!("empty lookahead, using fallback");
            return false;
        }

        let w = self.weights.normalized();
        let n = self.phrase_length;
        let low = self.register_low as f64;
        let high = self.register_high as f64;
        let mid = self.register_mid();
        let current_pcs = current.pitch_classes();
        let shared: Vec<u8> = current_pcs
            .iter()
            .copied()
            .filter(|&pc| next.contains_pitch_class(pc))
            .collect();
        let late_pcs = if shared.is_empty() { next.pitch_classes() } else { shared };

        let mut previous = self.last_note.map_or(mid, f64::from);
        for i in 0..n {
            let p = i as f64 / n as f64;
            let reference = previous.round().clamp(0.0, 127.0) as u8;

            let trend = low + lookahead.value_at(p).unwrap_or(0.5) * (high - low);
            let harmonic_pcs = if p < 0.5 { &current_pcs } else { &late_pcs };
            let harmonic = nearest_note(reference, harmonic_pcs).map_or(previous, f64::from);
            let tension = tension_at(p);
            let arc = mid + tension * (high - mid);

            let target = w.trend * trend + w.harmonic * harmonic + w.tension * arc + w.continuity * previous;
            let clamped = self.clamp_to_register(target);

            let note = if i + 1 == n {
                nearest_note(clamped, &[next.root % 12]).unwrap_or(clamped)
            } else if p < 0.5 {
                pool.nearest_chordal_note(clamped, Some(current), None)
            } else {
                pool.nearest_chordal_note(clamped, Some(current), Some(next))
            };
            let velocity = (64.0 + 40.0 * tension).round().clamp(1.0, 127.0) as u8;
            self.phrase.push_back(PhraseNote { note, velocity });
            previous = note as f64;
        }
        debug!(
            length = n,
            trend = ?lookahead.trend.direction,
            notes = ?self.phrase.iter().map(|p| p.note).collect::<Vec<_>>(),
            "phrase planned"
        );
        true
    }

    /// Chord-tone-biased single note from the last note.
    fn fallback_note(&mut self, strong: bool, current: Option<&Chord>, pool: &HarmonicPoolService) -> u8 {
        let from = self.last_note.unwrap_or_else(|| self.register_mid().round() as u8);
        let step = self.rng.range_f64(-4.0, 4.0).round();
        let candidate = self.clamp_to_register(from as f64 + step);
        if strong || self.rng.random_bool(0.7) {
            pool.nearest_chordal_note(candidate, current, None)
        } else {
            pool.nearest_pool_note(candidate)
        }
    }

    /// The melody note for one sixteenth step, if any.
    pub fn on_step(
        &mut self,
        step: usize,
        clock: &Clock,
        current: Option<&Chord>,
        pool: &HarmonicPoolService,
    ) -> Option<NoteRequest> {
        let step = step % STEPS_PER_BAR;
        if step % STEP_INTERVAL != 0 {
            return None;
        }
        let strong = Clock::is_strong_step(step);
        let (note, velocity) = match self.phrase.pop_front() {
            Some(planned) => (planned.note, planned.velocity),
            None => {
                if !self.rng.random_bool(self.activity) {
                    return None;
                }
                let velocity = if strong { 88 } else { 72 };
                (self.fallback_note(strong, current, pool), velocity)
            }
        };
        self.last_note = Some(note);
        Some(NoteRequest {
            channel: self.channel,
            note,
            velocity,
            duration_ticks: clock.ticks_per_step() * STEP_INTERVAL as u64,
            voice: LEAD_VOICE,
            strong_beat: strong,
        })
    }

    pub fn reset(&mut self) {
        self.phrase.clear();
        self.last_note = None;
    }
}

impl ParameterTarget for Soloist {
    fn component_id(&self) -> &str {
        COMPONENT_ID
    }

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn set_parameter(&mut self, id: &str, value: &ParameterValue) -> bool {
        let Some(v) = self.params.validate(id, value).and_then(|v| v.as_number()) else {
            return false;
        };
        match id {
            "phraseLength" => self.phrase_length = (v.round() as usize).clamp(MIN_PHRASE, MAX_PHRASE),
            "activity" => self.activity = v,
            "registerLow" => self.set_register(v.round() as u8, self.register_high),
            "registerHigh" => self.set_register(self.register_low, v.round() as u8),
            "trendWeight" => self.weights.trend = v,
            "harmonicWeight" => self.weights.harmonic = v,
            "tensionWeight" => self.weights.tension = v,
            "continuityWeight" => self.weights.continuity = v,
            _ => return false,
        }
        true
    }
}
