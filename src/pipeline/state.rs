//! Graph lifecycle state and the events the graph reports to its owner.
//!
//! ```text
//! Stopped ──start()──▶ Playing
//! Playing ──stop()───▶ Stopped
//! any     ──Fatal────▶ Error ──stop()──▶ Stopped
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// GraphState
// ---------------------------------------------------------------------------

/// Aggregate lifecycle of a [`Graph`](super::Graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphState {
    /// No streaming thread; elements are not running.
    #[default]
    Stopped,
    /// Every element started and blocks are flowing.
    Playing,
    /// Streaming ended because of an unrecoverable stage fault.  Call
    /// [`Graph::stop`](super::Graph::stop) to release the elements.
    Error,
}

impl GraphState {
    pub fn is_playing(&self) -> bool {
        matches!(self, GraphState::Playing)
    }

    pub fn label(&self) -> &'static str {
        match self {
            GraphState::Stopped => "Stopped",
            GraphState::Playing => "Playing",
            GraphState::Error => "Error",
        }
    }
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// GraphEvent
// ---------------------------------------------------------------------------

/// Notification surfaced by the graph.
///
/// Fatal classification:
///
/// | Event          | Fatal | Typical cause                              |
/// |----------------|-------|--------------------------------------------|
/// | `StateChanged` | no    | `start()` / `stop()`                       |
/// | `Info`         | no    | diagnostics from the streaming thread      |
/// | `Error`        | no    | one block dropped by a processing stage    |
/// | `EndOfStream`  | yes   | a live capture device stopped producing    |
/// | `Fatal`        | yes   | source or sink device failed or went away  |
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    StateChanged { from: GraphState, to: GraphState },
    Info(String),
    Error { stage: String, message: String },
    EndOfStream { stage: String },
    Fatal { stage: String, message: String },
}

impl GraphEvent {
    /// Whether the owner should shut the graph down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GraphEvent::Fatal { .. } | GraphEvent::EndOfStream { .. })
    }
}

impl fmt::Display for GraphEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphEvent::StateChanged { from, to } => write!(f, "state {from} -> {to}"),
            GraphEvent::Info(msg) => write!(f, "info: {msg}"),
            GraphEvent::Error { stage, message } => write!(f, "error in '{stage}': {message}"),
            GraphEvent::EndOfStream { stage } => write!(f, "end of stream from '{stage}'"),
            GraphEvent::Fatal { stage, message } => write!(f, "fatal error in '{stage}': {message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
