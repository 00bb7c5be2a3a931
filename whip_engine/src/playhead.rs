// Playheads: normalized time cursors over a data timeline.
//
// A playhead's position is a fraction of its visualization's timeline in
// [0, 1), never a pixel offset, so sampling is independent of how (or
// whether) the data is drawn. Each clock tick an enabled playhead moves by
// `timeline.distance_per_tick() × speed`, wrapping at the end, and samples
// the data point under it. When the sampled point changes the playhead
// publishes its value on `playhead:<vizId>:<playheadId>:value` together with
// a lookahead forecast on `data:lookahead:<playheadId>`; bindings subscribe
// to the former, the soloist reads the latter.
//
// Lookahead windows cover the data points the playhead will cross within
// the next `ticks_ahead` ticks at its current speed (at least one point),
// plus the current point. The trend is a least-squares line through the
// window's normalized values; its confidence is the fit's r².
//
// `Visualization` owns one timeline and any number of playheads. Playheads
// persist as the JSON list `{id, position, speed, enabled, color}`, the same
// shape used to create them.

use crate::bus::{EventBus, topics};
use crate::clock::Clock;
use crate::error::EngineResult;
use crate::timeline::{DataSample, Timeline};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Highest speed multiplier a playhead accepts.
pub const MAX_SPEED: f64 = 16.0;

/// Regression slopes smaller than this (per data point) read as flat.
pub const FLAT_SLOPE: f64 = 0.01;

/// Adjacent lookahead deltas at least this large count as an event.
pub const EVENT_DELTA: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playhead {
    pub id: String,
    /// Fraction of the timeline, in [0, 1).
    pub position: f64,
    /// Multiplier on the timeline's base rate, in [0, MAX_SPEED].
    pub speed: f64,
    pub enabled: bool,
    /// Cosmetic; echoed in value messages.
    pub color: String,
    /// Last sampled point, used to publish only on change.
    #[serde(skip)]
    last_sample: Option<DataSample>,
}

impl Playhead {
    pub fn new(id: &str) -> Self {
        Playhead {
            id: id.to_string(),
            position: 0.0,
            speed: 1.0,
            enabled: true,
            color: "#ffffff".to_string(),
            last_sample: None,
        }
    }

    /// Wrap any finite position into [0, 1). Non-finite input resets to 0.
    pub fn set_position(&mut self, position: f64) {
        self.position = wrap_unit(position);
        self.last_sample = None;
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = if speed.is_finite() {
            speed.clamp(0.0, MAX_SPEED)
        } else {
            1.0
        };
    }

    /// Move by one tick's worth of timeline and return the normalized
    /// distance travelled. Disabled playheads do not move.
    pub fn advance(&mut self, distance_per_tick: f64) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        let elapsed = (distance_per_tick * self.speed).max(0.0);
        self.position = wrap_unit(self.position + elapsed);
        elapsed
    }

    pub fn last_sample(&self) -> Option<DataSample> {
        self.last_sample
    }

    /// Record a sample and publish it on the playhead's value topic.
    pub fn sample_value(&mut self, visualization_id: &str, sample: DataSample, bus: &mut EventBus) {
        self.last_sample = Some(sample);
        let message = PlayheadValueMessage {
            value: sample.normalized,
            raw_value: sample.raw,
            position: self.position,
            color: self.color.clone(),
        };
        bus.publish_message(&topics::playhead_value(visualization_id, &self.id), &message);
    }

    /// Forecast the data the playhead is about to cross.
    pub fn compute_lookahead(&self, timeline: &dyn Timeline, clock: &Clock, ticks_ahead: u64) -> Lookahead {
        let n = timeline.point_count();
        let Some(current) = timeline.sample_at(self.position) else {
            return Lookahead::neutral();
        };
        let point_width = 1.0 / n as f64;
        let span = timeline.distance_per_tick(clock) * self.speed * ticks_ahead as f64;
        let upcoming = ((span / point_width).ceil() as usize).clamp(1, n);
        // Sample point centres so float drift never lands on a boundary.
        let data_points: Vec<f64> = (0..=upcoming)
            .filter_map(|k| timeline.sample_at(((current.index + k) as f64 + 0.5) * point_width))
            .map(|s| s.normalized)
            .collect();
        Lookahead::from_points(data_points)
    }

    /// Serialize a list of playheads in the persisted shape.
    pub fn list_to_json(playheads: &[Playhead]) -> EngineResult<String> {
        Ok(serde_json::to_string(playheads)?)
    }

    /// Parse a persisted list, sanitizing position and speed. Records that
    /// do not parse are skipped with a warning.
    pub fn list_from_json(json: &str) -> EngineResult<Vec<Playhead>> {
        let records: Vec<serde_json::Value> = serde_json::from_str(json)?;
        let mut list = Vec::with_capacity(records.len());
        for (i, record) in records.into_iter().enumerate() {
            let mut p: Playhead = match serde_json::from_value(record) {
                Ok(p) => p,
                Err(e) => {
                    warn!(index = i, error = %e, "dropping malformed persisted playhead");
                    continue;
                }
            };
            let (pos, speed) = (p.position, p.speed);
            p.set_position(pos);
            p.set_speed(speed);
            list.push(p);
        }
        Ok(list)
    }
}

fn wrap_unit(p: f64) -> f64 {
    if !p.is_finite() {
        return 0.0;
    }
    let w = p.rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negatives.
    if w >= 1.0 { 0.0 } else { w }
}

/// Payload of `playhead:<vizId>:<playheadId>:value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayheadValueMessage {
    /// Normalized sample in [0, 1].
    pub value: f64,
    pub raw_value: f64,
    pub position: f64,
    pub color: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    /// Change in normalized value per data point.
    pub slope: f64,
    pub direction: TrendDirection,
    /// r² of the fit, 0..1.
    pub confidence: f64,
}

impl Trend {
    pub fn neutral() -> Self {
        Trend {
            slope: 0.0,
            direction: TrendDirection::Flat,
            confidence: 0.0,
        }
    }

    /// Least-squares line through `values` indexed 0, 1, 2, ...
    pub fn fit(values: &[f64]) -> Self {
        let n = values.len();
        if n < 2 {
            return Trend::neutral();
        }
        let nf = n as f64;
        let mean_x = (nf - 1.0) / 2.0;
        let mean_y = values.iter().sum::<f64>() / nf;
        let mut sxy = 0.0;
        let mut sxx = 0.0;
        let mut syy = 0.0;
        for (i, &y) in values.iter().enumerate() {
            let dx = i as f64 - mean_x;
            let dy = y - mean_y;
            sxy += dx * dy;
            sxx += dx * dx;
            syy += dy * dy;
        }
        let slope = sxy / sxx;
        if syy <= f64::EPSILON {
            // A constant window is a perfectly confident flat line.
            return Trend {
                slope: 0.0,
                direction: TrendDirection::Flat,
                confidence: 1.0,
            };
        }
        let confidence = ((sxy * sxy) / (sxx * syy)).clamp(0.0, 1.0);
        let direction = if slope > FLAT_SLOPE {
            TrendDirection::Rising
        } else if slope < -FLAT_SLOPE {
            TrendDirection::Falling
        } else {
            TrendDirection::Flat
        };
        Trend {
            slope,
            direction,
            confidence,
        }
    }
}

/// Payload of `data:lookahead[:<playheadId>]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lookahead {
    /// Normalized values, current point first.
    pub data_points: Vec<f64>,
    pub trend: Trend,
    pub estimated_event_count: usize,
    /// Ticks until the next chord change, filled in by the engine.
    pub ticks_until_chord: Option<u64>,
}

impl Lookahead {
    pub fn neutral() -> Self {
        Lookahead {
            data_points: Vec::new(),
            trend: Trend::neutral(),
            estimated_event_count: 0,
            ticks_until_chord: None,
        }
    }

    pub fn from_points(data_points: Vec<f64>) -> Self {
        let trend = Trend::fit(&data_points);
        let estimated_event_count = data_points
            .windows(2)
            .filter(|w| (w[1] - w[0]).abs() >= EVENT_DELTA)
            .count();
        Lookahead {
            data_points,
            trend,
            estimated_event_count,
            ticks_until_chord: None,
        }
    }

    /// Normalized value at a fraction of the window, if any data exists.
    pub fn value_at(&self, fraction: f64) -> Option<f64> {
        let n = self.data_points.len();
        if n == 0 {
            return None;
        }
        let idx = ((fraction.clamp(0.0, 1.0) * (n - 1) as f64).round() as usize).min(n - 1);
        self.data_points.get(idx).copied()
    }
}

/// A data timeline and the playheads traversing it.
pub struct Visualization {
    id: String,
    timeline: Box<dyn Timeline>,
    playheads: BTreeMap<String, Playhead>,
}

impl Visualization {
    pub fn new(id: &str, timeline: Box<dyn Timeline>) -> Self {
        Visualization {
            id: id.to_string(),
            timeline,
            playheads: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timeline(&self) -> &dyn Timeline {
        self.timeline.as_ref()
    }

    /// Insert a playhead, returning any playhead it replaced.
    pub fn add_playhead(&mut self, playhead: Playhead) -> Option<Playhead> {
        self.playheads.insert(playhead.id.clone(), playhead)
    }

    pub fn remove_playhead(&mut self, id: &str) -> Option<Playhead> {
        self.playheads.remove(id)
    }

    pub fn playhead(&self, id: &str) -> Option<&Playhead> {
        self.playheads.get(id)
    }

    pub fn playhead_mut(&mut self, id: &str) -> Option<&mut Playhead> {
        self.playheads.get_mut(id)
    }

    pub fn playheads(&self) -> impl Iterator<Item = &Playhead> {
        self.playheads.values()
    }

    pub fn playhead_ids(&self) -> Vec<String> {
        self.playheads.keys().cloned().collect()
    }

    pub fn playheads_to_json(&self) -> EngineResult<String> {
        let list: Vec<Playhead> = self.playheads.values().cloned().collect();
        Playhead::list_to_json(&list)
    }

    /// Advance, sample and publish every enabled playhead for one tick.
    ///
    /// With `publish_primary`, the first enabled playhead's lookahead is
    /// also published on the global `data:lookahead` topic.
    pub fn tick(
        &mut self,
        clock: &Clock,
        bus: &mut EventBus,
        lookahead_ticks: u64,
        ticks_until_chord: Option<u64>,
        publish_primary: bool,
    ) {
        let distance = self.timeline.distance_per_tick(clock);
        let mut primary_pending = publish_primary;
        for playhead in self.playheads.values_mut() {
            if !playhead.enabled {
                continue;
            }
            playhead.advance(distance);
            let Some(sample) = self.timeline.sample_at(playhead.position) else {
                continue;
            };
            let changed = playhead.last_sample.is_none_or(|s| s.index != sample.index);
            if !changed {
                continue;
            }
            playhead.sample_value(&self.id, sample, bus);

            let mut lookahead = playhead.compute_lookahead(self.timeline.as_ref(), clock, lookahead_ticks);
            lookahead.ticks_until_chord = ticks_until_chord;
            bus.publish_message(&topics::lookahead_for(&playhead.id), &lookahead);
            if primary_pending {
                bus.publish_message(topics::DATA_LOOKAHEAD, &lookahead);
                primary_pending = false;
            }
            debug!(
                visualization = %self.id,
                playhead = %playhead.id,
                index = sample.index,
                value = sample.normalized,
                "playhead sampled new point"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::SeriesTimeline;

    fn ramp(n: usize) -> SeriesTimeline {
        SeriesTimeline::new((0..n).map(|i| i as f64).collect())
    }

    #[test]
    fn set_position_wraps() {
        let mut p = Playhead::new("p");
        p.set_position(1.25);
        assert!((p.position - 0.25).abs() < 1e-12);
        p.set_position(-0.25);
        assert!((p.position - 0.75).abs() < 1e-12);
        p.set_position(f64::NAN);
        assert_eq!(p.position, 0.0);
        p.set_position(1.0);
        assert_eq!(p.position, 0.0);
    }

    #[test]
    fn advance_scales_by_speed_and_respects_enabled() {
        let mut p = Playhead::new("p");
        p.set_speed(2.0);
        assert!((p.advance(0.1) - 0.2).abs() < 1e-12);
        assert!((p.position - 0.2).abs() < 1e-12);
        p.enabled = false;
        assert_eq!(p.advance(0.1), 0.0);
        assert!((p.position - 0.2).abs() < 1e-12);
    }

    #[test]
    fn speed_is_clamped() {
        let mut p = Playhead::new("p");
        p.set_speed(100.0);
        assert_eq!(p.speed, MAX_SPEED);
        p.set_speed(-1.0);
        assert_eq!(p.speed, 0.0);
    }

    #[test]
    fn empty_timeline_gives_neutral_lookahead() {
        let p = Playhead::new("p");
        let t = SeriesTimeline::new(vec![]);
        let la = p.compute_lookahead(&t, &Clock::default(), 100);
        assert_eq!(la.trend, Trend::neutral());
        assert!(la.data_points.is_empty());
    }

    #[test]
    fn rising_ramp_is_rising() {
        let p = Playhead::new("p");
        let t = ramp(10);
        let la = p.compute_lookahead(&t, &Clock::default(), 24 * 4);
        assert!((5..=6).contains(&la.data_points.len()));
        assert_eq!(la.data_points[0], 0.0);
        assert_eq!(la.trend.direction, TrendDirection::Rising);
        assert!((la.trend.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn trend_fit_cases() {
        let falling = Trend::fit(&[1.0, 0.8, 0.6, 0.4]);
        assert_eq!(falling.direction, TrendDirection::Falling);
        assert!((falling.slope + 0.2).abs() < 1e-12);

        let flat = Trend::fit(&[0.4, 0.4, 0.4]);
        assert_eq!(flat.direction, TrendDirection::Flat);
        assert_eq!(flat.confidence, 1.0);

        assert_eq!(Trend::fit(&[0.3]), Trend::neutral());
    }

    #[test]
    fn event_count_counts_big_jumps() {
        let la = Lookahead::from_points(vec![0.0, 0.05, 0.5, 0.45, 0.9]);
        assert_eq!(la.estimated_event_count, 2);
        assert_eq!(la.value_at(1.0), Some(0.9));
        assert_eq!(Lookahead::neutral().value_at(0.5), None);
    }

    #[test]
    fn tick_publishes_only_on_new_point() {
        let clock = Clock::default();
        let mut viz = Visualization::new("viz", Box::new(ramp(4)));
        viz.add_playhead(Playhead::new("p"));
        let mut bus = EventBus::new();
        let sub = bus.subscribe(&topics::playhead_value("viz", "p"));

        // One data point lasts one beat = 24 ticks.
        let mut published = 0;
        for _ in 0..40 {
            viz.tick(&clock, &mut bus, 24, None, true);
            while let Some(d) = bus.pop_delivery() {
                assert_eq!(d.subscription, sub);
                published += 1;
            }
        }
        // First sample plus one new point per beat.
        assert_eq!(published, 2);
        assert!(bus.last_value(topics::DATA_LOOKAHEAD).is_some());
        assert!(bus.last_value(&topics::lookahead_for("p")).is_some());
    }

    #[test]
    fn disabled_playheads_are_silent() {
        let clock = Clock::default();
        let mut viz = Visualization::new("viz", Box::new(ramp(4)));
        let mut p = Playhead::new("p");
        p.enabled = false;
        viz.add_playhead(p);
        let mut bus = EventBus::new();
        viz.tick(&clock, &mut bus, 24, None, false);
        assert!(bus.last_value(&topics::playhead_value("viz", "p")).is_none());
        assert_eq!(viz.playhead("p").unwrap().position, 0.0);
    }

    #[test]
    fn playhead_list_json_roundtrip() {
        let mut a = Playhead::new("a");
        a.set_position(0.4);
        a.color = "#ff0000".to_string();
        let json = Playhead::list_to_json(&[a.clone(), Playhead::new("b")]).unwrap();
        let restored = Playhead::list_from_json(&json).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0], a);
        assert!(Playhead::list_from_json(r#"{"id": "a"}"#).is_err());
    }

    #[test]
    fn malformed_playhead_records_are_skipped() {
        let json = r##"[
            {"id": "ok", "position": 1.25, "speed": 2.0, "enabled": true, "color": "#00ff00"},
            {"id": 3},
            {"id": "nan", "position": "left", "speed": 1.0, "enabled": true, "color": "#fff"}
        ]"##;
        let restored = Playhead::list_from_json(json).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].id, "ok");
        assert!((restored[0].position - 0.25).abs() < 1e-9);
    }
}
