//! Error types for the bot binary.
//!
//! [`BotError`] covers everything that stops the process during startup or
//! while reading events. [`CommandError`] covers a single failed command;
//! the event loop logs it and moves on to the next message.

use lotus_core::platform::PlatformError;
use lotus_core::render::RenderError;
use lotus_core::store::{LayerNotFound, SaveError};

/// Top-level error for the bot binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: lotus_core::config::ConfigError,
    },

    /// The snapshot could not be read.
    #[error("snapshot error: {source}")]
    Load {
        /// The underlying load error.
        #[from]
        source: lotus_core::store::LoadError,
    },

    /// Startup reconciliation failed.
    #[error("reconcile error: {source}")]
    Reconcile {
        /// The underlying reconcile error.
        #[from]
        source: lotus_core::reconcile::ReconcileError,
    },

    /// Reading inbound events failed.
    #[error("event source error: {source}")]
    Events {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

/// Failure while executing one command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The command needs a layer but was sent elsewhere.
    #[error(transparent)]
    NoLayer(#[from] LayerNotFound),

    /// The mutation could not be persisted and was rolled back.
    #[error("persist failed: {0}")]
    Save(#[from] SaveError),

    /// The layer views could not be refreshed.
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    /// A reply, direct message or deletion failed.
    #[error("platform call failed: {0}")]
    Platform(#[from] PlatformError),
}
