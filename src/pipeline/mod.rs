//! Pipeline graph, stage model and the shared equalizer store.
//!
//! # Architecture
//!
//! ```text
//! StageSpec (config) ──Graph::assemble──▶ Graph { Vec<Stage>, EqualizerHandle }
//!                                            │
//!                               Graph::start │ StageFactory::build + Element::start
//!                                            ▼
//!                     Runner (streaming thread): source → … → sink
//!                                            │
//!                                 GraphEvent │ (mpsc)
//!                                            ▼
//!                        Graph::next_event / Graph::poll_events
//! ```
//!
//! The control plane only ever sees an [`EqualizerHandle`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! use live_eq::pipeline::{default_stage_specs, Graph};
//!
//! let mut graph = Graph::assemble(&default_stage_specs()).unwrap();
//! let eq = graph.equalizer();
//! graph.start().unwrap();
//! eq.set_band(0, 5.0).unwrap();
//! for event in graph.poll_events() {
//!     println!("{event}");
//! }
//! graph.stop();
//! ```

pub mod element;
pub mod equalizer;
pub mod error;
pub mod graph;
pub mod runner;
pub mod stage;
pub mod state;

#[cfg(test)]
pub(crate) mod mock;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use element::{build_processor, AudioBlock, DeviceFactory, Element, Flow, StageFactory};
pub use equalizer::{EqualizerHandle, BAND_COUNT, DEFAULT_GAINS, MAX_GAIN_DB, MIN_GAIN_DB};
pub use error::{ConfigurationError, ParameterError, PipelineError, StageFault};
pub use graph::{Graph, StopFailure, StopReport, DEFAULT_BLOCK_TIMEOUT};
pub use stage::{default_stage_specs, AudioFormat, Caps, ParamValue, Stage, StageKind, StageSpec};
pub use state::{GraphEvent, GraphState};
