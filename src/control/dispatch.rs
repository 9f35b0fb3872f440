//! Routes decoded requests to the equalizer or the mixer.

use std::sync::Arc;

use super::request::{decode, ControlRequest, Outcome};
use crate::pipeline::EqualizerHandle;
use crate::system::Mixer;

/// Everything a control connection is allowed to touch: the equalizer
/// gains and the mixer.  Never the graph itself.
#[derive(Clone)]
pub struct Dispatcher {
    equalizer: EqualizerHandle,
    mixer: Arc<dyn Mixer>,
}

impl Dispatcher {
    pub fn new(equalizer: EqualizerHandle, mixer: Arc<dyn Mixer>) -> Self {
        Self { equalizer, mixer }
    }

    /// Decode and execute one request line.
    pub fn handle_line(&self, line: &str) -> Outcome {
        match decode(line) {
            Ok(request) => self.dispatch(request),
            Err(e) if e.is_unknown_message() => {
                log::warn!("control: unknown message: {:?}", line.trim_end());
                Outcome::Error
            }
            Err(e) => {
                log::debug!("control: rejected request: {e}");
                Outcome::Error
            }
        }
    }

    pub fn dispatch(&self, request: ControlRequest) -> Outcome {
        match request {
            ControlRequest::Mixer(action) => {
                self.mixer.apply(action);
                Outcome::Ok
            }
            ControlRequest::Set { param, value } => match self.equalizer.set_param(&param, value) {
                Ok(()) => {
                    log::debug!("control: {param} = {value}");
                    Outcome::Ok
                }
                Err(e) => {
                    log::debug!("control: set rejected: {e}");
                    Outcome::Error
                }
            },
        }
    }
}
