// Data timelines: the capability interface playheads sample through.
//
// A visualization adapter exposes its data to the engine by implementing
// `Timeline`. The playhead engine never knows how the data is drawn; it only
// asks how many points there are, what value sits at a normalized position,
// and how far along the timeline one clock tick moves a playhead at speed 1.
//
// `SeriesTimeline` is the built-in implementation over a plain numeric
// series. It normalizes with the series' own min/max and can be loaded from
// a two-column `label,value` CSV. `moving_average()` derives a smoothed copy
// with a centered window, for driving slower musical parameters from noisy
// data.

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One sampled data point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataSample {
    /// Index of the underlying data point.
    pub index: usize,
    /// Value as stored in the data.
    pub raw: f64,
    /// Value scaled into [0, 1].
    pub normalized: f64,
}

/// What a visualization must provide for its playheads.
pub trait Timeline {
    /// Number of data points. Zero means the timeline is empty.
    fn point_count(&self) -> usize;

    /// The data point under a normalized position in [0, 1).
    fn sample_at(&self, position: f64) -> Option<DataSample>;

    /// Normalized distance a speed-1 playhead moves per clock tick.
    fn distance_per_tick(&self, clock: &Clock) -> f64;
}

/// A numeric series spread evenly across the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesTimeline {
    labels: Vec<String>,
    values: Vec<f64>,
    min: f64,
    max: f64,
    /// Clock beats each data point occupies at speed 1.
    beats_per_point: f64,
}

impl SeriesTimeline {
    /// Build from raw values. Non-finite values are replaced by the previous
    /// finite value (or 0.0 at the start).
    pub fn new(values: Vec<f64>) -> Self {
        let labels = (0..values.len()).map(|i| i.to_string()).collect();
        Self::with_labels(labels, values)
    }

    pub fn with_labels(labels: Vec<String>, values: Vec<f64>) -> Self {
        let mut last = 0.0;
        let values: Vec<f64> = values
            .into_iter()
            .map(|v| {
                if v.is_finite() {
                    last = v;
                }
                last
            })
            .collect();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        SeriesTimeline {
            labels,
            values,
            min: if min.is_finite() { min } else { 0.0 },
            max: if max.is_finite() { max } else { 0.0 },
            beats_per_point: 1.0,
        }
    }

    /// Parse `label,value` lines. The first line is a header and is skipped.
    /// Blank lines are ignored; any other malformed line is an error.
    pub fn from_csv_str(text: &str) -> EngineResult<Self> {
        let mut labels = Vec::new();
        let mut values = Vec::new();
        for (i, line) in text.lines().enumerate().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (label, value) = line.rsplit_once(',').ok_or_else(|| EngineError::Csv {
                line: i + 1,
                message: "expected `label,value`".to_string(),
            })?;
            let value: f64 = value.trim().parse().map_err(|_| EngineError::Csv {
                line: i + 1,
                message: format!("`{}` is not a number", value.trim()),
            })?;
            labels.push(label.trim().to_string());
            values.push(value);
        }
        if values.is_empty() {
            return Err(EngineError::EmptyTimeline);
        }
        Ok(Self::with_labels(labels, values))
    }

    pub fn load_csv(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_csv_str(&text)
    }

    /// Set how many beats each point occupies at speed 1 (clamped to
    /// [1/16, 64]).
    pub fn with_beats_per_point(mut self, beats: f64) -> Self {
        self.beats_per_point = if beats.is_finite() {
            beats.clamp(1.0 / 16.0, 64.0)
        } else {
            1.0
        };
        self
    }

    /// Centered moving average with `window` points, rounded to one
    /// decimal.
    ///
    /// The window is clamped to [1, len] and starts `window / 2` points
    /// before each index. Near the edges it is shifted or truncated to stay
    /// inside the series, so the result keeps its length and labels.
    pub fn moving_average(&self, window: usize) -> SeriesTimeline {
        let len = self.values.len();
        let window = window.clamp(1, len.max(1));
        let averaged = (0..len)
            .map(|i| {
                let start = i.saturating_sub(window / 2);
                let end = (start + window).min(len);
                let slice = &self.values[start..end];
                let mean = slice.iter().sum::<f64>() / slice.len() as f64;
                (mean * 10.0).round() / 10.0
            })
            .collect();
        SeriesTimeline::with_labels(self.labels.clone(), averaged)
            .with_beats_per_point(self.beats_per_point)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    fn normalize(&self, v: f64) -> f64 {
        let span = self.max - self.min;
        if span <= f64::EPSILON {
            0.5
        } else {
            ((v - self.min) / span).clamp(0.0, 1.0)
        }
    }
}

impl Timeline for SeriesTimeline {
    fn point_count(&self) -> usize {
        self.values.len()
    }

    fn sample_at(&self, position: f64) -> Option<DataSample> {
        let len = self.values.len();
        if len == 0 || !position.is_finite() {
            return None;
        }
        let p = position.rem_euclid(1.0);
        let index = ((p * len as f64).floor() as usize).min(len - 1);
        let raw = self.values[index];
        Some(DataSample {
            index,
            raw,
            normalized: self.normalize(raw),
        })
    }

    fn distance_per_tick(&self, clock: &Clock) -> f64 {
        let len = self.values.len();
        if len == 0 {
            return 0.0;
        }
        let ticks_per_point = self.beats_per_point * clock.ticks_per_beat() as f64;
        1.0 / (len as f64 * ticks_per_point)
    }
}
