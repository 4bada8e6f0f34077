//! Lotus spot tracker bot.
//!
//! Wires configuration, the state store, the platform connector and the
//! command handler together, reconciles the stored tree with the platform
//! and then serves commands until the event source closes.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `lotus-config.yaml` (or `$LOTUS_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Record the boot time and open the state store
//! 4. Connect the platform (console mode: in-memory server)
//! 5. Reconcile the store with the platform
//! 6. Serve commands until end of input

mod command;
mod console;
mod context;
mod error;

use std::path::PathBuf;

use chrono::Utc;
use lotus_core::config::LotusConfig;
use lotus_core::platform::InMemoryPlatform;
use lotus_core::reconcile::Reconciler;
use lotus_core::store::StateStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::context::BotContext;
use crate::error::BotError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "lotus-config.yaml";

/// Application entry point for the bot.
///
/// # Errors
///
/// Returns an error if configuration, the snapshot, reconciliation or the
/// event source fails. Individual command failures are logged instead.
#[tokio::main]
async fn main() -> Result<(), BotError> {
    // 1. Load configuration.
    let config_path = config_path();
    let config = load_config(&config_path)?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!(
        config = %config_path.display(),
        found = config_path.exists(),
        zones = config.zones.len(),
        prefix = %config.bot.prefix,
        state_path = %config.bot.state_path.display(),
        "lotus-bot starting"
    );

    // 3. Record boot time and open the store.
    let boot_time = Utc::now();
    let mut store = StateStore::open(&config.bot.state_path, &config, boot_time)?;
    info!(boot_time = %boot_time, "State store opened");

    // 4. Connect the platform.
    let authorized = config.authorized_channels();
    let platform = InMemoryPlatform::with_channels(
        console::CONSOLE_BOT_USER,
        authorized.iter().map(String::as_str),
    );
    info!(channels = authorized.len(), "Console platform ready");

    // 5. Reconcile.
    let report = Reconciler::new(&platform, config.bot.platform_timeout(), &config.timer)
        .run(&mut store, &config.bot.state_path)
        .await?;
    info!(
        layers = report.layers,
        unresolved_members = report.members_unresolved.len(),
        "Ready for commands"
    );

    // 6. Serve commands.
    let context = BotContext::new(platform, config, store);
    console::run(&context).await?;

    info!("lotus-bot shutdown complete");
    Ok(())
}

/// Location of the configuration file: `$LOTUS_CONFIG` or the default.
fn config_path() -> PathBuf {
    std::env::var_os("LOTUS_CONFIG").map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load configuration, falling back to defaults when the file is absent.
fn load_config(path: &std::path::Path) -> Result<LotusConfig, BotError> {
    if path.exists() {
        Ok(LotusConfig::from_file(path)?)
    } else {
        // Defaults still honor the environment overrides.
        Ok(LotusConfig::parse("{}")?)
    }
}
