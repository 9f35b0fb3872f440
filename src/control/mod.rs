//! TCP control plane.
//!
//! ```text
//! client ──line──▶ ControlServer ──decode──▶ Dispatcher ─┬─▶ EqualizerHandle::set_param
//!        ◀─OK/ERROR─                                      └─▶ Mixer::apply (detached)
//! ```

pub mod dispatch;
pub mod request;
pub mod server;

pub use dispatch::Dispatcher;
pub use request::{decode, ControlRequest, DecodeError, Outcome};
pub use server::ControlServer;
