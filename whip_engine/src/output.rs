// Note requests and the audio-output collaborator.
//
// Generators return `NoteRequest`s: what to play and how long, in ticks,
// plus the humanizer voice and whether the note sits on a strong beat. The
// engine humanizes each request, turns it into a `Note` with millisecond
// timing and hands it to an `AudioOutput` at its (possibly deferred) onset.
// Outputs own note-offs: `send_note` carries the duration.
//
// Implementations:
// - `RecordingOutput` keeps an in-memory log (tests, inspection).
// - `MidiFileOutput` collects notes and writes a Standard MIDI File with
//   `midly`, one track per channel after a tempo track.
// - `FanOutput` forwards to several outputs.

use crate::error::{EngineError, EngineResult};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// A note a generator wants played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteRequest {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub duration_ticks: u64,
    /// Humanizer voice; notes on the same voice drift together.
    pub voice: u32,
    pub strong_beat: bool,
}

/// A concrete note handed to an output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub duration_ms: f64,
}

pub trait AudioOutput {
    /// Start a note at `at_ms`; the output ends it after `duration_ms`.
    fn send_note(&mut self, at_ms: f64, note: Note);
    fn stop_note(&mut self, at_ms: f64, channel: u8, note: u8);
    /// Silence everything.
    fn panic(&mut self, at_ms: f64);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutputEvent {
    Note { at_ms: f64, note: Note },
    Stop { at_ms: f64, channel: u8, note: u8 },
    Panic { at_ms: f64 },
}

#[derive(Debug, Clone, Default)]
pub struct RecordingOutput {
    pub events: Vec<OutputEvent>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes(&self) -> impl Iterator<Item = (f64, &Note)> {
        self.events.iter().filter_map(|e| match e {
            OutputEvent::Note { at_ms, note } => Some((*at_ms, note)),
            _ => None,
        })
    }

    pub fn notes_on_channel(&self, channel: u8) -> Vec<Note> {
        self.notes()
            .filter(|(_, n)| n.channel == channel)
            .map(|(_, n)| *n)
            .collect()
    }
}

impl AudioOutput for RecordingOutput {
    fn send_note(&mut self, at_ms: f64, note: Note) {
        self.events.push(OutputEvent::Note { at_ms, note });
    }

    fn stop_note(&mut self, at_ms: f64, channel: u8, note: u8) {
        self.events.push(OutputEvent::Stop { at_ms, channel, note });
    }

    fn panic(&mut self, at_ms: f64) {
        self.events.push(OutputEvent::Panic { at_ms });
    }
}

/// Forwards every call to each inner output in order.
#[derive(Default)]
pub struct FanOutput {
    outputs: Vec<Box<dyn AudioOutput>>,
}

impl FanOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, output: Box<dyn AudioOutput>) {
        self.outputs.push(output);
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl AudioOutput for FanOutput {
    fn send_note(&mut self, at_ms: f64, note: Note) {
        for o in &mut self.outputs {
            o.send_note(at_ms, note);
        }
    }

    fn stop_note(&mut self, at_ms: f64, channel: u8, note: u8) {
        for o in &mut self.outputs {
            o.stop_note(at_ms, channel, note);
        }
    }

    fn panic(&mut self, at_ms: f64) {
        for o in &mut self.outputs {
            o.panic(at_ms);
        }
    }
}

// ---------------------------------------------------------------------------
// Standard MIDI File output
// ---------------------------------------------------------------------------

/// MIDI ticks per quarter note in written files.
const TICKS_PER_QUARTER: u16 = 480;

/// One timed MIDI event before delta encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimedEvent {
    tick: u32,
    /// Note-offs sort before note-ons at the same tick.
    on: bool,
    key: u8,
    velocity: u8,
}

/// Collects notes and renders them as an SMF (format 1).
#[derive(Debug, Clone)]
pub struct MidiFileOutput {
    bpm: f64,
    events: BTreeMap<u8, Vec<TimedEvent>>,
}

impl MidiFileOutput {
    pub fn new(bpm: f64) -> Self {
        let bpm = if bpm.is_finite() && bpm > 0.0 { bpm } else { 120.0 };
        MidiFileOutput {
            bpm,
            events: BTreeMap::new(),
        }
    }

    fn ms_to_ticks(&self, ms: f64) -> u32 {
        let ms_per_quarter = 60_000.0 / self.bpm;
        let ticks = (ms.max(0.0) / ms_per_quarter * TICKS_PER_QUARTER as f64).round();
        ticks.min(u32::MAX as f64) as u32
    }

    fn push(&mut self, channel: u8, event: TimedEvent) {
        self.events.entry(channel.min(15)).or_default().push(event);
    }

    pub fn note_count(&self) -> usize {
        self.events.values().flatten().filter(|e| e.on).count()
    }

    pub fn channels(&self) -> Vec<u8> {
        self.events.keys().copied().collect()
    }

    /// Render everything collected so far.
    pub fn to_smf(&self) -> Smf<'static> {
        let mut smf = Smf::new(Header::new(
            Format::Parallel,
            Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
        ));

        let tempo_microseconds = (60_000_000.0 / self.bpm).round() as u32;
        smf.tracks.push(vec![
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ]);

        for (&channel, events) in &self.events {
            let mut sorted = events.clone();
            sorted.sort();
            let mut track: Track<'static> = Vec::with_capacity(sorted.len() + 1);
            let mut last_tick = 0u32;
            for e in sorted {
                let message = if e.on {
                    MidiMessage::NoteOn {
                        key: u7::new(e.key.min(127)),
                        vel: u7::new(e.velocity.clamp(1, 127)),
                    }
                } else {
                    MidiMessage::NoteOff {
                        key: u7::new(e.key.min(127)),
                        vel: u7::new(0),
                    }
                };
                track.push(TrackEvent {
                    delta: u28::new(e.tick - last_tick),
                    kind: TrackEventKind::Midi {
                        channel: u4::new(channel),
                        message,
                    },
                });
                last_tick = e.tick;
            }
            track.push(TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            });
            smf.tracks.push(track);
        }
        smf
    }

    pub fn to_bytes(&self) -> EngineResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.to_smf()
            .write(&mut buf)
            .map_err(|e| EngineError::Midi(e.to_string()))?;
        Ok(buf)
    }

    pub fn write(&self, path: &Path) -> EngineResult<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, &bytes)?;
        info!(path = %path.display(), notes = self.note_count(), "midi file written");
        Ok(())
    }
}

impl AudioOutput for MidiFileOutput {
    fn send_note(&mut self, at_ms: f64, note: Note) {
        let start = self.ms_to_ticks(at_ms);
        let end = self.ms_to_ticks(at_ms + note.duration_ms.max(1.0)).max(start + 1);
        self.push(note.channel, TimedEvent { tick: start, on: true, key: note.note, velocity: note.velocity });
        self.push(note.channel, TimedEvent { tick: end, on: false, key: note.note, velocity: 0 });
    }

    fn stop_note(&mut self, at_ms: f64, channel: u8, note: u8) {
        let tick = self.ms_to_ticks(at_ms);
        self.push(channel, TimedEvent { tick, on: false, key: note, velocity: 0 });
    }

    fn panic(&mut self, at_ms: f64) {
        // Note-offs for every key that was ever started on each channel.
        let tick = self.ms_to_ticks(at_ms);
        let mut offs = Vec::new();
        for (&channel, events) in &self.events {
            let mut keys: Vec<u8> = events.iter().filter(|e| e.on).map(|e| e.key).collect();
            keys.sort_unstable();
            keys.dedup();
            offs.extend(keys.into_iter().map(|key| (channel, key)));
        }
        for (channel, key) in offs {
            self.push(channel, TimedEvent { tick, on: false, key, velocity: 0 });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn note(channel: u8, key: u8) -> Note {
        Note {
            channel,
            note: key,
            velocity: 100,
            duration_ms: 250.0,
        }
    }

    #[test]
    fn recording_keeps_order() {
        let mut out = RecordingOutput::new();
        out.send_note(0.0, note(0, 60));
        out.stop_note(10.0, 0, 60);
        out.send_note(20.0, note(9, 36));
        out.panic(30.0);
        assert_eq!(out.events.len(), 4);
        assert_eq!(out.notes().count(), 2);
        assert_eq!(out.notes_on_channel(9), vec![note(9, 36)]);
    }

    struct Shared(Rc<RefCell<RecordingOutput>>);

    impl AudioOutput for Shared {
        fn send_note(&mut self, at_ms: f64, note: Note) {
            self.0.borrow_mut().send_note(at_ms, note);
        }
        fn stop_note(&mut self, at_ms: f64, channel: u8, note: u8) {
            self.0.borrow_mut().stop_note(at_ms, channel, note);
        }
        fn panic(&mut self, at_ms: f64) {
            self.0.borrow_mut().panic(at_ms);
        }
    }

    #[test]
    fn fan_output_reaches_everyone() {
        let a = Rc::new(RefCell::new(RecordingOutput::new()));
        let b = Rc::new(RefCell::new(RecordingOutput::new()));
        let mut fan = FanOutput::new();
        fan.push(Box::new(Shared(a.clone())));
        fan.push(Box::new(Shared(b.clone())));
        fan.send_note(5.0, note(1, 40));
        fan.panic(6.0);
        assert_eq!(a.borrow().events.len(), 2);
        assert_eq!(b.borrow().events, a.borrow().events);
    }

    #[test]
    fn midi_file_has_tempo_and_channel_tracks() {
        let mut out = MidiFileOutput::new(120.0);
        out.send_note(0.0, note(0, 60));
        out.send_note(500.0, note(0, 62));
        out.send_note(500.0, note(9, 36));
        assert_eq!(out.note_count(), 3);
        assert_eq!(out.channels(), vec![0, 9]);

        let smf = out.to_smf();
        assert_eq!(smf.tracks.len(), 3);
        // Two notes on channel 0: on/off/on/off plus end of track.
        assert_eq!(smf.tracks[1].len(), 5);
        // 500 ms at 120 bpm is one quarter note.
        let deltas: Vec<u32> = smf.tracks[1].iter().map(|e| e.delta.as_int()).collect();
        assert_eq!(deltas.iter().sum::<u32>(), 480 + 240);
    }

    #[test]
    fn midi_bytes_parse_back() {
        let mut out = MidiFileOutput::new(110.0);
        out.send_note(0.0, note(1, 45));
        let bytes = out.to_bytes().unwrap();
        let parsed = Smf::parse(&bytes).unwrap();
        assert_eq!(parsed.tracks.len(), 2);
    }

    #[test]
    fn midi_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mid");
        let mut out = MidiFileOutput::new(100.0);
        out.send_note(0.0, note(0, 60));
        out.panic(1000.0);
        out.write(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 14);
    }
}
