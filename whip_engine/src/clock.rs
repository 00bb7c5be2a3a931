// Musical clock arithmetic.
//
// The engine is driven by discrete ticks at `ppqn` pulses per quarter note.
// `Clock` turns a tick number into bars, beats and sixteenth-note steps and
// converts ticks to wall-clock milliseconds for scheduling humanized notes.
// It holds no running state; the current tick lives in engine.rs.

use serde::{Deserialize, Serialize};

/// Number of sixteenth-note slots in a rhythm grid.
pub const STEPS_PER_BAR: usize = 16;

/// Payload of `clock:tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickMessage {
    pub tick: u64,
    pub ppqn: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Clock {
    pub ppqn: u32,
    pub bpm: f64,
    pub beats_per_bar: u32,
}

impl Default for Clock {
    fn default() -> Self {
        Clock {
            ppqn: 24,
            bpm: 110.0,
            beats_per_bar: 4,
        }
    }
}

impl Clock {
    /// Copy with every field forced into a usable range.
    pub fn sanitized(self) -> Self {
        Clock {
            ppqn: self.ppqn.clamp(4, 960),
            bpm: if self.bpm.is_finite() {
                self.bpm.clamp(20.0, 400.0)
            } else {
                110.0
            },
            beats_per_bar: self.beats_per_bar.clamp(1, 16),
        }
    }

    pub fn ticks_per_beat(&self) -> u64 {
        self.ppqn as u64
    }

    pub fn ticks_per_bar(&self) -> u64 {
        self.ppqn as u64 * self.beats_per_bar as u64
    }

    /// Ticks per sixteenth note, at least 1.
    pub fn ticks_per_step(&self) -> u64 {
        (self.ppqn as u64 / 4).max(1)
    }

    pub fn ms_per_tick(&self) -> f64 {
        60_000.0 / (self.bpm * self.ppqn as f64)
    }

    pub fn ticks_to_ms(&self, ticks: u64) -> f64 {
        ticks as f64 * self.ms_per_tick()
    }

    pub fn bar_of(&self, tick: u64) -> u64 {
        tick / self.ticks_per_bar()
    }

    /// Grid slot (0..16) if `tick` falls exactly on a sixteenth boundary,
    /// counted from the start of its bar. Bars shorter than 4/4 use the
    /// leading slots only; sixteenths past slot 15 in longer bars rest.
    pub fn step_at(&self, tick: u64) -> Option<usize> {
        let per_step = self.ticks_per_step();
        let in_bar = tick % self.ticks_per_bar().max(1);
        if in_bar % per_step != 0 {
            return None;
        }
        let step = (in_bar / per_step) as usize;
        (step < STEPS_PER_BAR).then_some(step)
    }

    /// Beat 1 and beat 3 of a 16-slot bar are strong.
    pub fn is_strong_step(step: usize) -> bool {
        step % 8 == 0
    }
}
