// Harmonic pools, tonic centres and the harmonic pool service.
//
// A `Pool` is the seven-pitch-class diatonic set implied by a key signature
// token ("0" for no accidentals, "3#" for three sharps, "2b" for two flats).
// A `TonicCenter` pairs a pool with one concrete MIDI note that acts as
// degree 1; every degree computation in the engine goes through a centre,
// never through a fixed "major scale" convention, so the same pool can be
// read as Ionian, Dorian, Aeolian, ... depending on the tonic.
//
// `HarmonicPoolService` owns the current centre. It is an explicitly
// constructed service: the engine creates one, passes it by reference to the
// generators, and calls `reset()` when it wants a fresh C-major state.
// Changing the centre bumps `generation()`, which lets consumers discard any
// degrees they cached against the old centre.
//
// Nearest-note snapping preserves register: the candidate pitch classes are
// placed in the input's octave and one octave either side, and the closest
// candidate wins (ties go downward). Quantization is always the last step
// applied to a generated pitch.

use crate::bus::{EventBus, topics};
use crate::chord::{self, Chord, ChordQuality, VoicingStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Major-scale intervals; every pool is a rotation of this set.
const MAJOR_STEPS: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];

/// Maximum accidentals a key signature can carry.
const MAX_ACCIDENTALS: u8 = 7;

/// An immutable diatonic pitch-class set named by its key-signature token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    key: String,
    /// Pitch classes, ascending from 0.
    pitch_classes: [u8; 7],
}

impl Pool {
    /// The pool with no accidentals (C major / A minor collection).
    pub fn natural() -> Self {
        Pool {
            key: "0".to_string(),
            pitch_classes: MAJOR_STEPS,
        }
    }

    /// Parse a key-signature token. Returns `None` for unknown tokens.
    ///
    /// Accepted: `"0"`, `"<n>#"`, `"<n>b"`, bare `"<n>"` (sharps) and
    /// `"-<n>"` (flats), with n in 1..=7.
    pub fn try_from_key(token: &str) -> Option<Self> {
        let t = token.trim();
        let (count, sharps) = if let Some(n) = t.strip_suffix('#') {
            (n.parse::<u8>().ok()?, true)
        } else if let Some(n) = t.strip_suffix('b') {
            (n.parse::<u8>().ok()?, false)
        } else if let Some(n) = t.strip_prefix('-') {
            (n.parse::<u8>().ok()?, false)
        } else {
            (t.parse::<u8>().ok()?, true)
        };
        if count > MAX_ACCIDENTALS {
            return None;
        }
        if count == 0 {
            return Some(Pool::natural());
        }
        // Each sharp moves the major tonic up a fifth, each flat up a fourth.
        let tonic_pc = if sharps {
            (7 * count) % 12
        } else {
            (5 * count) % 12
        };
        let mut pcs = MAJOR_STEPS.map(|s| (s + tonic_pc) % 12);
        pcs.sort_unstable();
        let key = format!("{count}{}", if sharps { '#' } else { 'b' });
        Some(Pool {
            key,
            pitch_classes: pcs,
        })
    }

    /// Parse a key-signature token, falling back to the natural pool.
    pub fn from_key(token: &str) -> Self {
        Self::try_from_key(token).unwrap_or_else(|| {
            warn!(token, "unknown pool key, using natural pool");
            Pool::natural()
        })
    }

    /// Normalized key token ("0", "2#", "3b").
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn pitch_classes(&self) -> &[u8; 7] {
        &self.pitch_classes
    }

    pub fn contains(&self, note: u8) -> bool {
        self.pitch_classes.contains(&(note % 12))
    }

    /// Pitch class of the major-mode tonic of this key signature.
    pub fn major_tonic_pc(&self) -> u8 {
        // The member whose rotation reproduces the major step pattern.
        self.pitch_classes
            .iter()
            .copied()
            .find(|&pc| {
                let mut rotated = self.pitch_classes.map(|p| (p + 12 - pc) % 12);
                rotated.sort_unstable();
                rotated == MAJOR_STEPS
            })
            .unwrap_or(0)
    }

    /// Pool members ordered by ascending interval above `tonic_pc`.
    pub fn ordered_from(&self, tonic_pc: u8) -> [u8; 7] {
        let mut rel = self.pitch_classes.map(|pc| (pc + 12 - tonic_pc % 12) % 12);
        rel.sort_unstable();
        rel.map(|r| (r + tonic_pc) % 12)
    }
}

/// A pool plus the concrete MIDI note acting as degree 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonicCenter {
    pub pool: Pool,
    pub tonic: u8,
}

impl TonicCenter {
    /// Build a centre, snapping a tonic outside the pool to the nearest
    /// member.
    pub fn new(pool: Pool, tonic: u8) -> Self {
        let tonic = tonic.min(127);
        let tonic = if pool.contains(tonic) {
            tonic
        } else {
            let snapped = nearest_note(tonic, pool.pitch_classes()).unwrap_or(tonic);
            warn!(
                tonic,
                snapped,
                pool = pool.key(),
                "tonic is not a pool member, clamping to nearest member"
            );
            snapped
        };
        TonicCenter { pool, tonic }
    }

    /// Semitone offsets of degrees 1..=7 above the tonic.
    pub fn degree_intervals(&self) -> [u8; 7] {
        let tonic_pc = self.tonic % 12;
        self.pool
            .ordered_from(tonic_pc)
            .map(|pc| (pc + 12 - tonic_pc) % 12)
    }

    /// MIDI note of a 1-based degree; degrees above 7 continue upward
    /// (8 is the tonic an octave up). Degree 0 is treated as 1.
    pub fn degree_to_note(&self, degree: u8) -> u8 {
        let d = degree.max(1) as u16 - 1;
        let intervals = self.degree_intervals();
        let note = self.tonic as u16 + intervals[(d % 7) as usize] as u16 + 12 * (d / 7);
        note.min(127) as u8
    }

    /// Diatonic chord on a degree, built by stacking pool thirds.
    ///
    /// With `sevenths`, a fourth chord tone is stacked; `dominant_on_major`
    /// forces major-quality chords to dominant sevenths (blues).
    pub fn diatonic_chord(&self, degree: u8, sevenths: bool, dominant_on_major: bool) -> Chord {
        let degree = degree.clamp(1, 7);
        let root = self.degree_to_note(degree);
        let third = self.degree_to_note(degree + 2) - root;
        let fifth = self.degree_to_note(degree + 4) - root;
        let triad = match (third, fifth) {
            (4, 7) => ChordQuality::Major,
            (3, 7) => ChordQuality::Minor,
            (3, 6) => ChordQuality::Diminished,
            (4, 8) => ChordQuality::Augmented,
            _ => ChordQuality::Major,
        };
        let quality = if !sevenths {
            triad
        } else if dominant_on_major && triad == ChordQuality::Major {
            ChordQuality::Dominant7
        } else {
            let seventh = self.degree_to_note(degree + 6) - root;
            match (triad, seventh) {
                (ChordQuality::Major, 11) => ChordQuality::Major7,
                (ChordQuality::Major, _) => ChordQuality::Dominant7,
                (ChordQuality::Minor, _) => ChordQuality::Minor7,
                (ChordQuality::Diminished, 9) => ChordQuality::Diminished7,
                (ChordQuality::Diminished, _) => ChordQuality::HalfDiminished7,
                (other, _) => other,
            }
        };
        Chord::new(root, quality, degree)
    }
}

/// Payload of `context:pool`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMessage {
    pub pool_key: String,
    pub tonic_note: u8,
    pub tonic_name: String,
    /// One octave of pool notes starting at the tonic.
    pub notes: Vec<u8>,
}

/// Owner of the current tonal centre.
#[derive(Debug, Clone)]
pub struct HarmonicPoolService {
    center: TonicCenter,
    generation: u64,
}

impl Default for HarmonicPoolService {
    fn default() -> Self {
        Self::new()
    }
}

impl HarmonicPoolService {
    /// C major, tonic C4.
    pub fn new() -> Self {
        HarmonicPoolService {
            center: TonicCenter::new(Pool::natural(), 60),
            generation: 0,
        }
    }

    /// Return to C major / C4. Counts as a centre change.
    pub fn reset(&mut self) {
        self.center = TonicCenter::new(Pool::natural(), 60);
        self.generation += 1;
    }

    pub fn center(&self) -> &TonicCenter {
        &self.center
    }

    pub fn pool(&self) -> &Pool {
        &self.center.pool
    }

    pub fn tonic(&self) -> u8 {
        self.center.tonic
    }

    /// Incremented on every centre change; cached degrees from an older
    /// generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replace the centre and publish `context:pool`.
    ///
    /// Unknown keys fall back to the natural pool; a tonic outside the pool
    /// is clamped to the nearest member. Both are logged, neither fails.
    pub fn set_pool_and_tonic(&mut self, pool_key: &str, tonic: u8, bus: &mut EventBus) {
        let pool = Pool::from_key(pool_key);
        self.center = TonicCenter::new(pool, tonic);
        self.generation += 1;
        debug!(
            pool = self.center.pool.key(),
            tonic = self.center.tonic,
            generation = self.generation,
            "tonic centre changed"
        );
        self.publish_state(bus);
    }

    pub fn pool_message(&self) -> PoolMessage {
        let tonic = self.center.tonic;
        let notes = self
            .center
            .degree_intervals()
            .iter()
            .map(|&iv| (tonic as u16 + iv as u16).min(127) as u8)
            .collect();
        PoolMessage {
            pool_key: self.center.pool.key().to_string(),
            tonic_note: tonic,
            tonic_name: note_name(tonic),
            notes,
        }
    }

    pub fn publish_state(&self, bus: &mut EventBus) {
        bus.publish_message(topics::CONTEXT_POOL, &self.pool_message());
    }

    /// 1-based degree of `note` relative to `reference_tonic` within `pool`,
    /// or 0 when the note is outside the pool.
    pub fn get_scale_degree(note: u8, pool: &Pool, reference_tonic: u8) -> u8 {
        if !pool.contains(note) {
            return 0;
        }
        pool.ordered_from(reference_tonic % 12)
            .iter()
            .position(|&pc| pc == note % 12)
            .map_or(0, |p| p as u8 + 1)
    }

    /// Degree of `note` relative to the current centre.
    pub fn scale_degree(&self, note: u8) -> u8 {
        Self::get_scale_degree(note, &self.center.pool, self.center.tonic)
    }

    /// Concrete notes for a chord. The style is reserved.
    pub fn voice_chord(&self, chord: &Chord, style: VoicingStyle) -> Vec<u8> {
        chord::voice(chord.root, chord.quality, style)
    }

    /// Nearest note whose pitch class is in the current pool.
    pub fn nearest_pool_note(&self, note: u8) -> u8 {
        nearest_note(note.min(127), self.center.pool.pitch_classes()).unwrap_or(note)
    }

    /// Nearest note whose pitch class belongs to `current` or `next`.
    /// Falls back to the pool when both chords are absent.
    pub fn nearest_chordal_note(&self, note: u8, current: Option<&Chord>, next: Option<&Chord>) -> u8 {
        let mut pcs: Vec<u8> = current
            .into_iter()
            .chain(next)
            .flat_map(Chord::pitch_classes)
            .collect();
        pcs.sort_unstable();
        pcs.dedup();
        if pcs.is_empty() {
            return self.nearest_pool_note(note);
        }
        nearest_note(note.min(127), &pcs).unwrap_or_else(|| self.nearest_pool_note(note))
    }

    pub fn degree_to_note(&self, degree: u8) -> u8 {
        self.center.degree_to_note(degree)
    }

    pub fn chord_for_degree(&self, degree: u8, sevenths: bool, dominant_on_major: bool) -> Chord {
        self.center.diatonic_chord(degree, sevenths, dominant_on_major)
    }
}

/// Nearest note to `note` whose pitch class is in `pcs`, searching the same
/// octave and one octave either side. Ties resolve to the lower note.
pub fn nearest_note(note: u8, pcs: &[u8]) -> Option<u8> {
    let base = (note / 12) as i16 * 12;
    let target = note as i16;
    let mut best: Option<(i16, i16)> = None;
    for &pc in pcs {
        for shift in [0i16, 12, -12] {
            let cand = base + (pc % 12) as i16 + shift;
            if !(0..=127).contains(&cand) {
                continue;
            }
            let dist = (cand - target).abs();
            let better = match best {
                None => true,
                Some((bd, bc)) => dist < bd || (dist == bd && cand < bc),
            };
            if better {
                best = Some((dist, cand));
            }
        }
    }
    best.map(|(_, cand)| cand as u8)
}

/// Scientific pitch name, C4 = 60.
pub fn note_name(note: u8) -> String {
    let octave = (note / 12) as i16 - 1;
    format!("{}{}", chord::pitch_class_name(note), octave)
}

/// Parse "C4", "F#3", "Bb2", "c-1". A missing octave means octave 4.
/// Returns `None` for malformed names or notes outside 0..=127.
pub fn parse_note_name(name: &str) -> Option<u8> {
    let mut chars = name.trim().chars().peekable();
    let letter = chars.next()?.to_ascii_uppercase();
    let mut pc: i16 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    while let Some(&c) = chars.peek() {
        match c {
            '#' => pc += 1,
            'b' => pc -= 1,
            _ => break,
        }
        chars.next();
    }
    let rest: String = chars.collect();
    let octave: i16 = if rest.is_empty() { 4 } else { rest.parse().ok()? };
    let note = (octave + 1) * 12 + pc;
    (0..=127).contains(&note).then_some(note as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_tokens_produce_expected_pools() {
        assert_eq!(Pool::from_key("0").pitch_classes(), &[0, 2, 4, 5, 7, 9, 11]);
        // One sharp: G major, F#.
        assert!(Pool::from_key("1#").contains(66));
        assert!(!Pool::from_key("1#").contains(65));
        // Two flats: Bb major.
        let bb = Pool::from_key("2b");
        assert!(bb.contains(70) && bb.contains(63));
        assert_eq!(bb.major_tonic_pc(), 10);
        assert_eq!(Pool::from_key("-2"), bb);
        assert_eq!(Pool::from_key("3").key(), "3#");
    }

    #[test]
    fn every_key_is_diatonic() {
        for n in 0..=7u8 {
            for suffix in ['#', 'b'] {
                let pool = Pool::from_key(&format!("{n}{suffix}"));
                let mut pcs = pool.pitch_classes().to_vec();
                pcs.dedup();
                assert_eq!(pcs.len(), 7, "pool {} not seven distinct pcs", pool.key());
                let tonic = pool.major_tonic_pc();
                let mut rel: Vec<u8> = pcs.iter().map(|p| (p + 12 - tonic) % 12).collect();
                rel.sort_unstable();
                assert_eq!(rel, MAJOR_STEPS.to_vec());
            }
        }
    }

    #[test]
    fn unknown_key_falls_back_to_natural() {
        assert_eq!(Pool::from_key("9#"), Pool::natural());
        assert_eq!(Pool::from_key("banana"), Pool::natural());
        assert!(Pool::try_from_key("8b").is_none());
    }

    #[test]
    fn tonic_is_always_degree_one() {
        for n in 0..=7u8 {
            let pool = Pool::from_key(&format!("{n}#"));
            for note in 36..=84u8 {
                if pool.contains(note) {
                    assert_eq!(HarmonicPoolService::get_scale_degree(note, &pool, note), 1);
                }
            }
        }
    }

    #[test]
    fn scale_degree_relative_to_reference_tonic() {
        let pool = Pool::natural();
        // D dorian reading of the natural pool.
        assert_eq!(HarmonicPoolService::get_scale_degree(69, &pool, 62), 5);
        assert_eq!(HarmonicPoolService::get_scale_degree(60, &pool, 62), 7);
        assert_eq!(HarmonicPoolService::get_scale_degree(61, &pool, 62), 0);
    }

    #[test]
    fn nearest_pool_note_stays_in_pool_and_close() {
        let mut service = HarmonicPoolService::new();
        let mut bus = EventBus::new();
        for key in ["0", "3#", "5b"] {
            service.set_pool_and_tonic(key, 60, &mut bus);
            for n in 0..=127u8 {
                let snapped = service.nearest_pool_note(n);
                assert!(service.pool().contains(snapped));
                assert!((snapped as i16 - n as i16).abs() <= 6);
            }
        }
    }

    #[test]
    fn nearest_note_ties_go_down() {
        assert_eq!(nearest_note(61, &[0, 2]), Some(60));
        assert_eq!(nearest_note(66, &MAJOR_STEPS), Some(65));
        // Wraps across the octave boundary.
        assert_eq!(nearest_note(71, &[0]), Some(72));
    }

    #[test]
    fn nearest_chordal_note_uses_union() {
        let service = HarmonicPoolService::new();
        let c = Chord::new(60, ChordQuality::Major, 1);
        let g = Chord::new(67, ChordQuality::Major, 5);
        // D is a G-chord tone.
        assert_eq!(service.nearest_chordal_note(62, Some(&c), Some(&g)), 62);
        assert_eq!(service.nearest_chordal_note(62, Some(&c), None), 60);
        // No chords: snap to pool.
        assert_eq!(service.nearest_chordal_note(61, None, None), 60);
    }

    #[test]
    fn tonic_outside_pool_is_clamped() {
        let mut service = HarmonicPoolService::new();
        let mut bus = EventBus::new();
        service.set_pool_and_tonic("0", 61, &mut bus);
        assert_eq!(service.tonic(), 60);
        let msg: PoolMessage = bus.last_message(topics::CONTEXT_POOL).unwrap();
        assert_eq!(msg.tonic_note, 60);
        assert_eq!(msg.notes, vec![60, 62, 64, 65, 67, 69, 71]);
    }

    #[test]
    fn changing_centre_bumps_generation() {
        let mut service = HarmonicPoolService::new();
        let mut bus = EventBus::new();
        let g0 = service.generation();
        service.set_pool_and_tonic("1#", 67, &mut bus);
        assert!(service.generation() > g0);
        service.reset();
        assert_eq!(service.tonic(), 60);
        assert_eq!(service.pool(), &Pool::natural());
    }

    #[test]
    fn diatonic_chords_in_c_major() {
        let center = TonicCenter::new(Pool::natural(), 60);
        assert_eq!(center.diatonic_chord(1, false, false).quality, ChordQuality::Major);
        assert_eq!(center.diatonic_chord(2, false, false).quality, ChordQuality::Minor);
        assert_eq!(center.diatonic_chord(7, false, false).quality, ChordQuality::Diminished);
        assert_eq!(center.diatonic_chord(1, true, false).quality, ChordQuality::Major7);
        assert_eq!(center.diatonic_chord(5, true, false).quality, ChordQuality::Dominant7);
        assert_eq!(center.diatonic_chord(7, true, false).quality, ChordQuality::HalfDiminished7);
        assert_eq!(center.diatonic_chord(4, true, true).quality, ChordQuality::Dominant7);
        assert_eq!(center.diatonic_chord(6, false, false).root, 69);
    }

    #[test]
    fn minor_reading_of_pool() {
        let center = TonicCenter::new(Pool::natural(), 57);
        assert_eq!(center.diatonic_chord(1, false, false).quality, ChordQuality::Minor);
        assert_eq!(center.degree_to_note(3), 60);
        assert_eq!(center.degree_to_note(8), 69);
    }

    #[test]
    fn voiced_chords_follow_the_centre() {
        let mut service = HarmonicPoolService::new();
        let mut bus = EventBus::new();
        service.set_pool_and_tonic("2b", 70, &mut bus);
        let ii7 = service.chord_for_degree(2, true, false);
        assert_eq!(service.voice_chord(&ii7, VoicingStyle::Close), vec![72, 75, 79, 82]);
        let top = Chord::new(124, ChordQuality::Major, 1);
        assert_eq!(service.voice_chord(&top, VoicingStyle::Open), vec![124, 127]);
    }

    #[test]
    fn note_names_roundtrip() {
        assert_eq!(note_name(60), "C4");
        assert_eq!(note_name(0), "C-1");
        assert_eq!(parse_note_name("C4"), Some(60));
        assert_eq!(parse_note_name("Bb3"), Some(58));
        assert_eq!(parse_note_name("f#"), Some(66));
        assert_eq!(parse_note_name("c-1"), Some(0));
        assert_eq!(parse_note_name("H2"), None);
        assert_eq!(parse_note_name("G9"), None);
        for n in 0..=127u8 {
            assert_eq!(parse_note_name(&note_name(n)), Some(n));
        }
    }
}
