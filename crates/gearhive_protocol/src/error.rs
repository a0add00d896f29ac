//! Protocol error types

use crate::message::{PacketKind, MAX_ARG_SIZE};
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid magic code")]
    InvalidMagic,

    #[error("invalid packet kind: {0}")]
    InvalidKind(u32),

    #[error("packet {kind} is unexpected for this role")]
    InvalidRole { kind: PacketKind },

    #[error("wrong argument count for {kind}: expected {expected}, got {got}")]
    InvalidArity {
        kind: PacketKind,
        expected: usize,
        got: usize,
    },

    #[error("argument too long: {len} bytes (max {MAX_ARG_SIZE})")]
    ArgumentTooLong { len: usize },

    #[error("argument is not valid UTF-8")]
    InvalidArgumentEncoding,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// True when the underlying I/O error means the peer went away rather
    /// than the stream carrying a malformed frame.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
