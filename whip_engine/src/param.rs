// Generator parameters: the contract between the routing layer and the
// musical generators.
//
// A generator declares each parameter it exposes once, at construction, in a
// `ParameterSet`: an id and a `ParameterKind`. The binding layer reads the
// kind to turn a mapped value in [0, 1] into a concrete `ParameterValue` and
// hands it to the generator through `ParameterTarget::set_parameter()`. It
// never touches generator internals.
//
// Kinds:
// - `Number { min, max }` receives `min + y × (max - min)`.
// - `Select { options }` receives option `floor(y × n)`, clamped to the last.
// - `Pulse` carries no value; it fires a side effect (regenerate, etc.). The
//   rising-edge detection that decides *when* a pulse fires lives with the
//   binding, because it is per-stream state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ParameterKind {
    Number { min: f64, max: f64 },
    Select { options: Vec<String> },
    Pulse,
}

impl ParameterKind {
    pub fn number(min: f64, max: f64) -> Self {
        ParameterKind::Number { min, max }
    }

    pub fn select(options: &[&str]) -> Self {
        ParameterKind::Select {
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Value for a mapped input `y` in [0, 1]. `None` for pulses and for a
    /// select with no options.
    pub fn resolve(&self, y: f64) -> Option<ParameterValue> {
        let y = if y.is_finite() { y.clamp(0.0, 1.0) } else { return None };
        match self {
            ParameterKind::Number { min, max } => Some(ParameterValue::Number(min + y * (max - min))),
            ParameterKind::Select { options } => {
                if options.is_empty() {
                    return None;
                }
                let idx = ((y * options.len() as f64).floor() as usize).min(options.len() - 1);
                Some(ParameterValue::Select(options[idx].clone()))
            }
            ParameterKind::Pulse => None,
        }
    }
}

/// A concrete value delivered to a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ParameterValue {
    Number(f64),
    Select(String),
    Pulse,
}

impl ParameterValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParameterValue::Number(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::Select(s) => Some(s),
            _ => None,
        }
    }
}

/// The parameters one generator exposes, in id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    specs: BTreeMap<String, ParameterKind>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter. Re-declaring an id replaces its kind.
    pub fn register(&mut self, id: &str, kind: ParameterKind) {
        self.specs.insert(id.to_string(), kind);
    }

    pub fn get(&self, id: &str) -> Option<&ParameterKind> {
        self.specs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterKind)> {
        self.specs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Clamp a number into its declared range, or check that a select value
    /// is one of the options. `None` if the value does not fit the kind.
    pub fn validate(&self, id: &str, value: &ParameterValue) -> Option<ParameterValue> {
        match (self.specs.get(id)?, value) {
            (ParameterKind::Number { min, max }, ParameterValue::Number(v)) if v.is_finite() => {
                Some(ParameterValue::Number(v.clamp(*min, *max)))
            }
            (ParameterKind::Select { options }, ParameterValue::Select(s)) => {
                options.iter().any(|o| o == s).then(|| value.clone())
            }
            (ParameterKind::Pulse, ParameterValue::Pulse) => Some(ParameterValue::Pulse),
            _ => None,
        }
    }
}

/// A generator reachable by bindings.
pub trait ParameterTarget {
    /// Stable id bindings use as their target component.
    fn component_id(&self) -> &str;

    fn parameters(&self) -> &ParameterSet;

    /// Apply a value. Returns false (and changes nothing) if the id is
    /// unknown or the value does not fit the parameter's kind.
    fn set_parameter(&mut self, id: &str, value: &ParameterValue) -> bool;
}
