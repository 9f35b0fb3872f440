//! Application settings structs, defaults and TOML persistence.
//!
//! Every section is `#[serde(default)]`, so a partial `settings.toml` only
//! overrides the keys it names.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::pipeline::{default_stage_specs, StageSpec};

// ---------------------------------------------------------------------------
// DeviceConfig
// ---------------------------------------------------------------------------

/// Commands run once at startup to put the sound device into the format the
/// capture stage expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub enabled: bool,
    /// Shell command lines, run in order.
    pub commands: Vec<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let device = "/dev/sound";
        let settings = [
            "record.encoding=slinear_le",
            "record.precision=16",
            "record.rate=48000",
            "record.channels=1",
            "play.encoding=slinear_le",
            "play.precision=16",
            "play.rate=48000",
            "play.channels=1",
        ];
        Self {
            enabled: true,
            commands: settings
                .iter()
                .map(|s| format!("audioctl -d {device} -w {s}"))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Longest time the source waits for a block before the streaming thread
    /// re-checks for a stop request.
    pub block_timeout_ms: u64,
    /// Ordered chain, source first and sink last.
    pub stages: Vec<StageSpec>,
}

impl PipelineConfig {
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms.max(1))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_timeout_ms: 100,
            stages: default_stage_specs(),
        }
    }
}

// ---------------------------------------------------------------------------
// ControlConfig
// ---------------------------------------------------------------------------

/// TCP control server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub bind_addr: String,
    /// Upper bound on one accept wait; also how quickly shutdown is noticed.
    pub accept_poll_ms: u64,
    /// Per-connection line read timeout.  `0` waits forever.
    pub read_timeout_ms: u64,
    /// Longest accepted request line, newline excluded.
    pub max_line_bytes: usize,
}

impl ControlConfig {
    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms.max(1))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        match self.read_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9999".into(),
            accept_poll_ms: 250,
            read_timeout_ms: 5_000,
            max_line_bytes: 4_096,
        }
    }
}

// ---------------------------------------------------------------------------
// MixerConfig
// ---------------------------------------------------------------------------

/// Shell commands behind the four mixer requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub volume_up: String,
    pub volume_down: String,
    pub input_up: String,
    pub input_down: String,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            volume_up: "mixerctl -w outputs.speaker++".into(),
            volume_down: "mixerctl -w outputs.speaker--".into(),
            input_up: "mixerctl -w record.mic++".into(),
            input_down: "mixerctl -w record.mic--".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SupervisorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How long shutdown waits for the control worker before aborting it.
    pub shutdown_grace_ms: u64,
}

impl SupervisorConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 2_000,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use live_eq::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// println!("control on {}", config.control.bind_addr);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub pipeline: PipelineConfig,
    pub control: ControlConfig,
    pub mixer: MixerConfig,
    pub supervisor: SupervisorConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
