// Chord qualities, interval tables and immutable chord values.
//
// A `Chord` is derived from `(root, quality)` through `ChordQuality::intervals`
// and never mutated afterwards: changing anything produces a new chord. The
// voicing is computed once at construction. `VoicingStyle` is accepted
// wherever a voicing is produced but currently has no effect beyond the
// default close-position stack.
//
// Used by pool.rs (diatonic chord resolution), composer.rs (progressions) and
// the three note generators.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Chord quality. Each quality owns a fixed interval table above the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Major7,
    Minor7,
    Dominant7,
    HalfDiminished7,
    Diminished7,
    Sus2,
    Sus4,
}

impl ChordQuality {
    /// Semitone intervals above the root, ascending.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ChordQuality::Major => &[0, 4, 7],
            ChordQuality::Minor => &[0, 3, 7],
            ChordQuality::Diminished => &[0, 3, 6],
            ChordQuality::Augmented => &[0, 4, 8],
            ChordQuality::Major7 => &[0, 4, 7, 11],
            ChordQuality::Minor7 => &[0, 3, 7, 10],
            ChordQuality::Dominant7 => &[0, 4, 7, 10],
            ChordQuality::HalfDiminished7 => &[0, 3, 6, 10],
            ChordQuality::Diminished7 => &[0, 3, 6, 9],
            ChordQuality::Sus2 => &[0, 2, 7],
            ChordQuality::Sus4 => &[0, 5, 7],
        }
    }

    /// Short symbol used in chord names ("", "m", "dim", "maj7", ...).
    pub fn symbol(self) -> &'static str {
        match self {
            ChordQuality::Major => "",
            ChordQuality::Minor => "m",
            ChordQuality::Diminished => "dim",
            ChordQuality::Augmented => "aug",
            ChordQuality::Major7 => "maj7",
            ChordQuality::Minor7 => "m7",
            ChordQuality::Dominant7 => "7",
            ChordQuality::HalfDiminished7 => "m7b5",
            ChordQuality::Diminished7 => "dim7",
            ChordQuality::Sus2 => "sus2",
            ChordQuality::Sus4 => "sus4",
        }
    }

    /// Parse a quality name. Unknown names fall back to a major triad.
    pub fn parse(name: &str) -> ChordQuality {
        match name.trim().to_ascii_lowercase().as_str() {
            "major" | "maj" | "" => ChordQuality::Major,
            "minor" | "min" | "m" => ChordQuality::Minor,
            "diminished" | "dim" => ChordQuality::Diminished,
            "augmented" | "aug" => ChordQuality::Augmented,
            "major7" | "maj7" => ChordQuality::Major7,
            "minor7" | "min7" | "m7" => ChordQuality::Minor7,
            "dominant7" | "dom7" | "7" => ChordQuality::Dominant7,
            "halfdiminished7" | "m7b5" => ChordQuality::HalfDiminished7,
            "diminished7" | "dim7" => ChordQuality::Diminished7,
            "sus2" => ChordQuality::Sus2,
            "sus4" => ChordQuality::Sus4,
            other => {
                warn!(quality = other, "unknown chord quality, using major triad");
                ChordQuality::Major
            }
        }
    }
}

/// Octave distribution for a voicing. Reserved: every style currently
/// produces the close-position stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VoicingStyle {
    #[default]
    Close,
    Open,
    Drop2,
}

/// Stack a quality's intervals on `root`, dropping notes above MIDI 127.
pub fn voice(root: u8, quality: ChordQuality, _style: VoicingStyle) -> Vec<u8> {
    quality
        .intervals()
        .iter()
        .map(|&iv| root as u16 + iv as u16)
        .filter(|&n| n <= 127)
        .map(|n| n as u8)
        .collect()
}

/// An immutable chord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chord {
    /// MIDI note of the root.
    pub root: u8,
    pub quality: ChordQuality,
    /// Scale degree 1..=7 relative to the tonic centre it was built in.
    pub degree: u8,
    /// Concrete MIDI notes, ascending, derived from `(root, quality)`.
    pub voicing: Vec<u8>,
}

impl Chord {
    pub fn new(root: u8, quality: ChordQuality, degree: u8) -> Self {
        let root = root.min(127);
        Chord {
            root,
            quality,
            degree: degree.clamp(1, 7),
            voicing: voice(root, quality, VoicingStyle::default()),
        }
    }

    /// Pitch classes of the chord tones, in voicing order.
    pub fn pitch_classes(&self) -> Vec<u8> {
        self.quality
            .intervals()
            .iter()
            .map(|&iv| (self.root + iv) % 12)
            .collect()
    }

    pub fn contains_pitch_class(&self, pc: u8) -> bool {
        self.pitch_classes().contains(&(pc % 12))
    }

    /// Human-readable name such as "Am7".
    pub fn name(&self) -> String {
        format!("{}{}", pitch_class_name(self.root), self.quality.symbol())
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Sharp-spelled name of a pitch class.
pub fn pitch_class_name(note: u8) -> &'static str {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    NAMES[(note % 12) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voicing_follows_interval_table() {
        let c = Chord::new(60, ChordQuality::Major, 1);
        assert_eq!(c.voicing, vec![60, 64, 67]);
        let d = Chord::new(62, ChordQuality::Minor7, 2);
        assert_eq!(d.voicing, vec![62, 65, 69, 72]);
    }

    #[test]
    fn voicing_drops_notes_above_127() {
        assert_eq!(voice(125, ChordQuality::Major, VoicingStyle::Close), vec![125]);
    }

    #[test]
    fn unknown_quality_falls_back_to_major() {
        assert_eq!(ChordQuality::parse("hexatonic"), ChordQuality::Major);
        assert_eq!(ChordQuality::parse("m7b5"), ChordQuality::HalfDiminished7);
    }

    #[test]
    fn voicing_style_is_reserved() {
        for style in [VoicingStyle::Close, VoicingStyle::Open, VoicingStyle::Drop2] {
            assert_eq!(voice(57, ChordQuality::Minor, style), vec![57, 60, 64]);
        }
    }

    #[test]
    fn chord_names() {
        assert_eq!(Chord::new(57, ChordQuality::Minor7, 6).name(), "Am7");
        assert_eq!(Chord::new(67, ChordQuality::Dominant7, 5).to_string(), "G7");
    }

    #[test]
    fn pitch_classes_wrap() {
        let b = Chord::new(71, ChordQuality::Diminished, 7);
        assert_eq!(b.pitch_classes(), vec![11, 2, 5]);
        assert!(b.contains_pitch_class(14));
    }
}
