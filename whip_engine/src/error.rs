// Error type for the engine's fallible public API.
//
// Only calls made from outside the tick loop return errors: registering a
// binding against endpoints that do not exist, loading config or data files,
// and reading/writing persisted state. Inside the tick loop every failure is
// degraded to a fallback and logged (see engine.rs), so nothing here ever
// escapes a tick.

use crate::binding::{BindingSource, BindingTarget};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("binding source {0} does not exist")]
    MissingSource(BindingSource),

    #[error("binding target {0} does not exist")]
    MissingTarget(BindingTarget),

    #[error("unknown visualization `{0}`")]
    UnknownVisualization(String),

    #[error("visualization `{0}` is already registered")]
    DuplicateVisualization(String),

    #[error("timeline data is empty")]
    EmptyTimeline,

    #[error("line {line}: {message}")]
    Csv { line: usize, message: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("midi error: {0}")]
    Midi(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
