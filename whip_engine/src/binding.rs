// Bindings: one playhead's value stream routed onto one generator parameter.
//
// A binding owns exactly one bus subscription, to its source playhead's value
// topic, while it is active. Each delivered sample goes through the mapping
// curve and then through the target parameter's `ParameterKind` (cached at
// registration) to become a `ParameterValue`. Disabled bindings keep their
// subscription but route nothing.
//
// Mapping functions, on input clamped to [0, 1]:
//
//   linear       y = x
//   exponential  y = x^curve
//   inverse      y = 1 - x
//   logarithmic  y = ln(99x + 1) / ln(100)
//
// Pulse parameters fire on the rising edge of the mapped value through 0.5.
// The edge state belongs to the binding; two bindings onto the same pulse
// each keep their own.
//
// The persisted/registered JSON shape is the struct's serde form; runtime
// state (subscription, cached kind, edge) is skipped.

use crate::bus::{EventBus, SubscriptionId, topics};
use crate::param::{ParameterKind, ParameterValue};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_CURVE: f64 = 0.1;
pub const MAX_CURVE: f64 = 10.0;

/// Mapped values at or above this are "high" for pulse edge detection.
pub const PULSE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MappingFunction {
    #[default]
    Linear,
    Exponential,
    Inverse,
    Logarithmic,
}

impl MappingFunction {
    /// Apply the curve. Input is clamped to [0, 1]; `curve` only affects
    /// `Exponential`.
    pub fn apply(self, x: f64, curve: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);
        let y = match self {
            MappingFunction::Linear => x,
            MappingFunction::Exponential => x.powf(clamp_curve(curve)),
            MappingFunction::Inverse => 1.0 - x,
            MappingFunction::Logarithmic => (99.0 * x + 1.0).ln() / 100f64.ln(),
        };
        y.clamp(0.0, 1.0)
    }
}

pub fn clamp_curve(curve: f64) -> f64 {
    if curve.is_finite() {
        curve.clamp(MIN_CURVE, MAX_CURVE)
    } else {
        1.0
    }
}

/// Where values come from: one playhead on one visualization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingSource {
    pub visualization_id: String,
    pub playhead_id: String,
}

impl BindingSource {
    pub fn new(visualization_id: &str, playhead_id: &str) -> Self {
        BindingSource {
            visualization_id: visualization_id.to_string(),
            playhead_id: playhead_id.to_string(),
        }
    }

    pub fn value_topic(&self) -> String {
        topics::playhead_value(&self.visualization_id, &self.playhead_id)
    }
}

impl fmt::Display for BindingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.visualization_id, self.playhead_id)
    }
}

/// Where values go: one parameter on one generator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingTarget {
    pub component_id: String,
    pub parameter_id: String,
}

impl BindingTarget {
    pub fn new(component_id: &str, parameter_id: &str) -> Self {
        BindingTarget {
            component_id: component_id.to_string(),
            parameter_id: parameter_id.to_string(),
        }
    }
}

impl fmt::Display for BindingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component_id, self.parameter_id)
    }
}

fn default_curve() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub id: String,
    pub source: BindingSource,
    pub target: BindingTarget,
    #[serde(default)]
    pub mapping_function: MappingFunction,
    #[serde(default = "default_curve")]
    pub curve: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    #[serde(skip)]
    subscription: Option<SubscriptionId>,
    #[serde(skip)]
    kind: Option<ParameterKind>,
    #[serde(skip)]
    pulse_high: bool,
}

impl PartialEq for Binding {
    /// Compares the persisted fields only.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.source == other.source
            && self.target == other.target
            && self.mapping_function == other.mapping_function
            && self.curve == other.curve
            && self.enabled == other.enabled
            && self.color == other.color
    }
}

impl Binding {
    pub fn new(id: &str, source: BindingSource, target: BindingTarget) -> Self {
        Binding {
            id: id.to_string(),
            source,
            target,
            mapping_function: MappingFunction::Linear,
            curve: 1.0,
            enabled: true,
            color: None,
            subscription: None,
            kind: None,
            pulse_high: false,
        }
    }

    pub fn with_mapping(mut self, function: MappingFunction, curve: f64) -> Self {
        self.set_mapping(function, curve);
        self
    }

    pub fn set_mapping(&mut self, function: MappingFunction, curve: f64) {
        self.mapping_function = function;
        self.curve = clamp_curve(curve);
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.subscription
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn kind(&self) -> Option<&ParameterKind> {
        self.kind.as_ref()
    }

    /// Subscribe to the source value topic, remembering the target's kind.
    /// A binding that is already active keeps its existing subscription.
    pub fn activate(&mut self, kind: ParameterKind, bus: &mut EventBus) -> SubscriptionId {
        self.curve = clamp_curve(self.curve);
        self.kind = Some(kind);
        if let Some(id) = self.subscription {
            return id;
        }
        let id = bus.subscribe(&self.source.value_topic());
        self.subscription = Some(id);
        id
    }

    /// Release the subscription. Safe to call on an inactive binding.
    pub fn deactivate(&mut self, bus: &mut EventBus) {
        if let Some(id) = self.subscription.take() {
            bus.unsubscribe(id);
        }
        self.pulse_high = false;
    }

    pub fn map_value(&self, x: f64) -> f64 {
        self.mapping_function.apply(x, self.curve)
    }

    /// Turn one sample into a parameter value, or `None` when nothing
    /// should be sent (disabled, inactive, non-finite sample, pulse not on
    /// a rising edge).
    pub fn route(&mut self, sample: f64) -> Option<ParameterValue> {
        if !sample.is_finite() || !self.enabled {
            return None;
        }
        let y = self.map_value(sample);
        match self.kind.as_ref()? {
            ParameterKind::Pulse => {
                let high = y >= PULSE_THRESHOLD;
                let rising = high && !self.pulse_high;
                self.pulse_high = high;
                rising.then_some(ParameterValue::Pulse)
            }
            kind => kind.resolve(y),
        }
    }
}
