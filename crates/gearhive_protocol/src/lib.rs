//! Gearman binary protocol
//!
//! Wire format for client/worker <-> broker communication.
//!
//! # Frame layout
//!
//! Header (12 bytes, network byte order):
//! ```text
//! [MAGIC:4][KIND:4][BODY_SIZE:4]
//! ```
//!
//! - MAGIC: `\0REQ` (client/worker -> broker) or `\0RES` (broker -> peer)
//! - KIND (u32): packet kind, 1..=42
//! - BODY_SIZE (u32): body length in bytes
//!
//! Body: arguments joined by a single NUL byte, no trailing NUL. A zero-size
//! body decodes to a message with no arguments.
//!
//! A stream whose next byte is not `\0` carries a line-terminated admin text
//! command instead of a binary frame; [`read_frame`] surfaces it as
//! [`Frame::Text`].

pub mod codec;
pub mod error;
pub mod id;
pub mod message;

pub use codec::{read_frame, write_frame, Frame};
pub use error::ProtocolError;
pub use id::{Id, IdParseError, ID_STR_LENGTH};
pub use message::{arity, Magic, Message, PacketKind, Role, RoleSet, HEADER_SIZE, MAX_ARG_SIZE};
