//! Application entry point: `live-eq [CONFIG_PATH]`.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from `CONFIG_PATH`, or from the platform config
//!    directory (defaults on first run).
//! 3. Create the [`tokio`] runtime.
//! 4. Configure the sound device.
//! 5. Run the [`Supervisor`] until Ctrl-C or a fatal pipeline fault.
//!
//! Exit codes: 0 interrupted, 1 pipeline start failure, 2 configuration
//! error, 3 fatal pipeline fault, 4 control listener bind failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use live_eq::{
    config::AppConfig,
    supervisor::Supervisor,
    system::{configure_device, CommandMixer, CommandRunner, ShellRunner},
};

const EXIT_CONFIG: u8 = 2;

/// Resolves when the process receives Ctrl-C.  If the handler cannot be
/// installed the run continues until a pipeline fault.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

fn load_config() -> anyhow::Result<AppConfig> {
    match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => {
            anyhow::ensure!(path.exists(), "config file {} not found", path.display());
            log::info!("loading config from {}", path.display());
            AppConfig::load_from(&path)
        }
        None => Ok(AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        })),
    }
}

fn main() -> ExitCode {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("live-eq starting up");

    // 2. Configuration
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    // 3. Tokio runtime (control server and mixer commands are light)
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = rt.block_on(async move {
        let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner);

        // 4. Device configuration (failures are logged, not fatal)
        configure_device(&config.device, runner.as_ref()).await;

        // 5. Supervise
        let mixer = Arc::new(CommandMixer::new(config.mixer.clone(), runner));
        let supervisor = Supervisor::new(config, mixer);
        match supervisor.run(interrupted()).await {
            Ok(reason) => {
                log::info!("live-eq stopped: {reason:?}");
                reason.exit_code()
            }
            Err(e) => {
                log::error!("{e}");
                e.exit_code()
            }
        }
    });

    ExitCode::from(code)
}
