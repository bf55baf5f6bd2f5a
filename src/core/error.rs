//! Error types for farmesh

use thiserror::Error;

use crate::core::types::Step;

/// Main error type for the far-mesh subsystem
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Tier {step} unavailable: {reason}")]
    Tier { step: Step, reason: String },

    #[error("Network error: {0}")]
    Net(#[from] farmesh_net::NetError),

    #[error("Streaming error: {0}")]
    Streaming(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}
