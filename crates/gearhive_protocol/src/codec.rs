//! Frame reader/writer over async streams.
//!
//! Binary frames and admin text lines share one stream: the first byte of a
//! binary frame is always `\0` (the magic), so anything else starts a
//! line-terminated text command.

use crate::error::ProtocolError;
use crate::message::{Magic, Message, PacketKind, HEADER_SIZE};
use byteorder::{BigEndian, ByteOrder};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// One unit read off a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A binary protocol packet.
    Packet(Message),
    /// An admin text command, up to and including the terminating newline.
    Text(String),
}

/// Read the next frame. Returns `Ok(None)` on a clean end of stream.
///
/// On an invalid magic or unknown kind the declared body is still consumed so
/// the stream stays aligned for the next frame; the error is surfaced after.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let first = {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(None);
        }
        buf[0]
    };

    if first != 0 {
        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line).await?;
        let text =
            String::from_utf8(line).map_err(|_| ProtocolError::InvalidArgumentEncoding)?;
        return Ok(Some(Frame::Text(text)));
    }

    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let magic = Magic::from_bytes(&header[..4]);
    let kind_raw = BigEndian::read_u32(&header[4..8]);
    let kind = magic.and(PacketKind::from_u32(kind_raw).ok());
    let body_size = BigEndian::read_u32(&header[8..12]) as usize;

    let (magic, kind) = match (magic, kind) {
        (Some(magic), Some(kind)) => (magic, kind),
        (magic, _) => {
            // keep the stream aligned for the next frame
            drain(reader, body_size).await?;
            return Err(match magic {
                None => ProtocolError::InvalidMagic,
                Some(_) => ProtocolError::InvalidKind(kind_raw),
            });
        }
    };

    let mut body = vec![0u8; body_size];
    reader.read_exact(&mut body).await?;
    let arguments = if body.is_empty() {
        Vec::new()
    } else {
        body.split(|b| *b == 0u8)
            .map(|arg| {
                String::from_utf8(arg.to_vec())
                    .map_err(|_| ProtocolError::InvalidArgumentEncoding)
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(Some(Frame::Packet(Message {
        magic,
        kind,
        arguments,
    })))
}

/// Encode and write one message.
pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = msg.encode()?;
    writer.write_all(&bytes).await?;
    Ok(())
}

async fn drain<R>(reader: &mut R, mut remaining: usize) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut scratch = [0u8; 4096];
    while remaining > 0 {
        let n = remaining.min(scratch.len());
        reader.read_exact(&mut scratch[..n]).await?;
        remaining -= n;
    }
    Ok(())
}
