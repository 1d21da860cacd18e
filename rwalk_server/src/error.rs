//! Server-level error type.

use rwalk_core::{ConfigError, ObstacleError, ResultsError};
use std::path::PathBuf;
use thiserror::Error;

/// Anything that stops the server from starting or finishing cleanly.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid obstacle map: {0}")]
    Obstacles(#[from] ObstacleError),

    #[error("Cannot resume from results file: {0}")]
    Resume(#[source] ResultsError),

    #[error("Failed to write results: {0}")]
    Results(#[source] ResultsError),

    #[error("Failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Simulation engine thread panicked")]
    EnginePanicked,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Process exit status: 2 for anything rejected before startup, 1 for
    /// runtime failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Obstacles(_) | Self::Resume(_) => 2,
            _ => 1,
        }
    }
}
