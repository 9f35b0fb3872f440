//! Mixer actions triggered from the control plane.
//!
//! Each action runs one configured command on its own tokio task; the
//! caller never waits for it and never sees its result.

use std::fmt;
use std::sync::Arc;

use super::command::CommandRunner;
use crate::config::MixerConfig;

/// Output volume and input level nudges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerAction {
    VolumeUp,
    VolumeDown,
    InputUp,
    InputDown,
}

impl MixerAction {
    /// Map a control request method name to an action.
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "volumeup" => Some(MixerAction::VolumeUp),
            "volumedown" => Some(MixerAction::VolumeDown),
            "inputup" => Some(MixerAction::InputUp),
            "inputdown" => Some(MixerAction::InputDown),
            _ => None,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            MixerAction::VolumeUp => "volumeup",
            MixerAction::VolumeDown => "volumedown",
            MixerAction::InputUp => "inputup",
            MixerAction::InputDown => "inputdown",
        }
    }
}

impl fmt::Display for MixerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// Something that can carry out a [`MixerAction`] without blocking.
pub trait Mixer: Send + Sync {
    fn apply(&self, action: MixerAction);
}

/// Runs the command configured for each action in the background.
pub struct CommandMixer {
    commands: MixerConfig,
    runner: Arc<dyn CommandRunner>,
}

impl CommandMixer {
    pub fn new(commands: MixerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { commands, runner }
    }

    pub fn command_for(&self, action: MixerAction) -> &str {
        match action {
            MixerAction::VolumeUp => &self.commands.volume_up,
            MixerAction::VolumeDown => &self.commands.volume_down,
            MixerAction::InputUp => &self.commands.input_up,
            MixerAction::InputDown => &self.commands.input_down,
        }
    }
}

impl Mixer for CommandMixer {
    fn apply(&self, action: MixerAction) {
        let command = self.command_for(action).to_string();
        let runner = Arc::clone(&self.runner);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("mixer: no runtime to run `{command}` on");
            return;
        };
        handle.spawn(async move {
            match runner.run(&command).await {
                Ok(()) => log::debug!("mixer: {action} done"),
                Err(e) => log::warn!("mixer: {action} failed: {e}"),
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Remembers every applied action.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingMixer {
    applied: std::sync::Mutex<Vec<MixerAction>>,
}

#[cfg(test)]
impl RecordingMixer {
    pub fn applied(&self) -> Vec<MixerAction> {
        self.applied.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Mixer for RecordingMixer {
    fn apply(&self, action: MixerAction) {
        self.applied.lock().unwrap().push(action);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
