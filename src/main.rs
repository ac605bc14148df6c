//! galaxy-goldberg - GOG Galaxy emulator to Goldberg SteamEmu achievement bridge
//!
//! Main entry point for the headless runner.
//!
//! # Execution Flow
//!
//! 1. Load `GalaxyGoldberg Data/Bridge Config.yaml` (plus `GALAXY_GOLDBERG__*` overrides)
//! 2. Initialize logging → `<log_dir>/galaxy-goldberg.<date>`
//! 3. Inspect each configured Galaxy library once and log its patch state
//! 4. Start the process monitor
//! 5. Run until Ctrl-C, then stop every session and exit
//!
//! Library patching is not automatic; the state is only reported here.

use anyhow::Result;
use camino::Utf8Path;
use galaxy_goldberg::{APP_NAME, BridgeController, ConfigManager, DATA_DIR, StateChange, VERSION};
use tokio::sync::broadcast::error::RecvError;

fn main() -> Result<()> {
    let config_manager = ConfigManager::new(DATA_DIR)?;
    let config = config_manager.load_config()?;

    let _guard = galaxy_goldberg::logging::setup_logging(
        Utf8Path::new(&config.settings.log_dir),
        config.settings.debug_mode,
        true,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("galaxy-goldberg-worker")
        .build()?;

    let result = runtime.block_on(run(config_manager, config));

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    tracing::info!("Shutdown complete");

    result.inspect_err(|e| tracing::error!("Bridge failed: {:#}", e))
}

async fn run(config_manager: ConfigManager, config: galaxy_goldberg::BridgeConfig) -> Result<()> {
    let state_manager = std::sync::Arc::new(galaxy_goldberg::StateManager::new());
    let mut controller = BridgeController::new(state_manager, config_manager, config);

    if controller.config().games.is_empty() {
        tracing::warn!("No games configured; add entries to {}", DATA_DIR);
    }

    let keys: Vec<String> = controller.config().games.keys().cloned().collect();
    for key in &keys {
        match controller.inspect_library(key) {
            Ok(targets) => {
                for target in targets {
                    tracing::info!("[{}] Galaxy library {}: {}", key, target.path, target.state);
                }
            }
            Err(e) => tracing::warn!("[{}] {:#}", key, e),
        }
    }

    let mut events = controller.state().subscribe();
    let listener = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StateChange::SessionStarted { game }) => tracing::info!("[{}] Watching", game),
                Ok(StateChange::SessionEnded { game }) => tracing::info!("[{}] Idle", game),
                Ok(StateChange::TranslationFailed { game, error }) => {
                    tracing::warn!("[{}] Last pass failed: {}", game, error)
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::debug!("Status listener skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    controller.start_monitoring();
    tracing::info!("Monitoring {} game(s); press Ctrl-C to stop", keys.len());

    let exited = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            None
        }
        exited = controller.monitor_exited() => Some(exited),
    };

    let result = match exited {
        Some(result) => result,
        None => {
            tracing::info!("Stopping");
            controller.stop_monitoring().await
        }
    };

    listener.abort();
    result
}
