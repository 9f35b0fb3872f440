//! One-shot sound device configuration at startup.

use super::command::CommandRunner;
use crate::config::DeviceConfig;

/// Run every configured device command in order and wait for each.
///
/// A failing command is logged and the rest still run; the device may
/// already be in the right format.  Returns the number of failures.
pub async fn configure_device(config: &DeviceConfig, runner: &dyn CommandRunner) -> usize {
    if !config.enabled {
        log::debug!("device: configuration disabled");
        return 0;
    }

    let mut failures = 0;
    for command in &config.commands {
        match runner.run(command).await {
            Ok(()) => log::debug!("device: ran `{command}`"),
            Err(e) => {
                log::warn!("device: {e}");
                failures += 1;
            }
        }
    }
    if failures == 0 {
        log::info!("device: {} setting(s) applied", config.commands.len());
    }
    failures
}
