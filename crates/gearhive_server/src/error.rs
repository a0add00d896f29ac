//! Server-side error types.

use gearhive_protocol::{IdParseError, ProtocolError};
use std::fmt;
use thiserror::Error;

/// Error raised while processing one packet.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Structured error surfaced to the peer as an `ERROR` packet.
    #[error("{message}")]
    Server { code: String, message: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid identifier: {0}")]
    Id(#[from] IdParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Queue and jobs-manager failures surface to the peer under one code.
    pub fn job_manager(err: impl fmt::Display) -> Self {
        HandlerError::Server {
            code: "job_manager".to_string(),
            message: err.to_string(),
        }
    }

    /// Arguments of the `ERROR` reply, when this error is surfaced to the
    /// peer. `None` means log-only.
    pub fn error_arguments(&self) -> Option<Vec<String>> {
        match self {
            HandlerError::Server { code, message } => {
                Some(vec![code.clone(), message.clone()])
            }
            _ => None,
        }
    }
}
