//! Error taxonomy for graph assembly, lifecycle and parameter mutation.
//!
//! | Error                | Raised by                       | Reaches           |
//! |----------------------|---------------------------------|-------------------|
//! | [`ConfigurationError`] | [`Graph::assemble`]           | supervisor (fatal)|
//! | [`PipelineError`]    | [`Graph::start`]                | supervisor        |
//! | [`ParameterError`]   | stage / equalizer setters       | control client    |
//! | [`StageFault`]       | [`Element`] implementations     | graph runner      |
//!
//! [`Graph::assemble`]: super::Graph::assemble
//! [`Graph::start`]: super::Graph::start
//! [`Element`]: super::Element

use thiserror::Error;

/// Invalid graph topology, stage kind or stage parameters at assembly time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("pipeline has no stages")]
    Empty,

    #[error("unknown stage kind '{kind}' for stage '{stage}'")]
    UnknownKind { stage: String, kind: String },

    #[error("pipeline needs exactly one {kind} stage, found {count}")]
    EndpointCount { kind: &'static str, count: usize },

    #[error("stage '{stage}' must be the {position} stage of the chain")]
    EndpointPosition {
        stage: String,
        position: &'static str,
    },

    #[error("pipeline allows at most one equalizer (filter) stage, found {0}")]
    EqualizerCount(usize),

    #[error("duplicate stage name '{0}'")]
    DuplicateName(String),

    #[error("stage '{stage}': {source}")]
    Parameter {
        stage: String,
        #[source]
        source: ParameterError,
    },

    #[error("stage '{stage}': invalid value for '{param}': {reason}")]
    InvalidParameter {
        stage: String,
        param: String,
        reason: String,
    },

    #[error("stage '{stage}': caps mismatch: {reason}")]
    CapsMismatch { stage: String, reason: String },
}

/// Lifecycle failures of an assembled graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// A stage could not be built or refused to enter Playing.  Stages that
    /// were already started have been stopped again.
    #[error("stage '{stage}' failed to start: {reason}")]
    StartFailed { stage: String, reason: String },

    /// Parameters changed since assembly no longer negotiate.
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] ConfigurationError),
}

impl PipelineError {
    /// Name of the stage responsible for the failure, when there is one.
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::StartFailed { stage, .. } => Some(stage),
            PipelineError::Negotiation(_) => None,
        }
    }
}

/// A rejected parameter mutation.  Never changes any stored value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("'{param}' out of range: {reason}")]
    OutOfRange { param: String, reason: String },

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("parameter '{param}' expects a {expected} value")]
    TypeMismatch {
        param: String,
        expected: &'static str,
    },

    #[error("unknown stage '{0}'")]
    UnknownStage(String),
}

/// Failure reported by a running [`Element`](super::Element).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageFault {
    /// The device could not be opened or configured.
    #[error("device error: {0}")]
    Device(String),

    /// The device went away while streaming.
    #[error("device disconnected: {0}")]
    Disconnected(String),

    /// A block could not be interpreted in the negotiated format.
    #[error("format error: {0}")]
    Format(String),

    /// Any other per-block processing failure.
    #[error("stream error: {0}")]
    Stream(String),
}
