//! Simulation harness errors.

use thiserror::Error;
use trackfuse_core::TrackingError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),
}
