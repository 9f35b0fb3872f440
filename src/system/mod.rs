//! Host integration: shell commands for device setup and mixer control.
//!
//! ```text
//! configure_device ──▶ CommandRunner (audioctl …)   once, awaited
//! CommandMixer     ──▶ CommandRunner (mixerctl …)   per request, detached
//! ```

pub mod command;
pub mod device;
pub mod mixer;

pub use command::{CommandError, CommandRunner, ShellRunner};
pub use device::configure_device;
pub use mixer::{CommandMixer, Mixer, MixerAction};
