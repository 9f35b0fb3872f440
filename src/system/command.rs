//! Running external shell commands (`audioctl`, `mixerctl`, …).

use async_trait::async_trait;
use thiserror::Error;

/// Errors from running one command line.
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    /// The shell itself could not be started.
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// The command ran but exited unsuccessfully.  `code` is `None` when it
    /// was killed by a signal.
    #[error("`{command}` exited with status {code:?}")]
    Status { command: String, code: Option<i32> },
}

/// Runs a command line to completion.
///
/// Implementors must be `Send + Sync` so they can be shared as
/// `Arc<dyn CommandRunner>` between the supervisor and mixer tasks.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<(), CommandError>;
}

/// Runs each command line through `sh -c`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<(), CommandError> {
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| CommandError::Spawn {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(CommandError::Status {
                command: command.to_string(),
                code: status.code(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Records every command line; lines listed in `failing` report a non-zero
/// exit status.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingRunner {
    pub ran: std::sync::Mutex<Vec<String>>,
    pub failing: Vec<String>,
}

#[cfg(test)]
impl RecordingRunner {
    pub fn ran(&self) -> Vec<String> {
        self.ran.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &str) -> Result<(), CommandError> {
        self.ran.lock().unwrap().push(command.to_string());
        if self.failing.iter().any(|f| f == command) {
            return Err(CommandError::Status {
                command: command.to_string(),
                code: Some(1),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
