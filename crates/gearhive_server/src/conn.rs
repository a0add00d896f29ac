//! Server-side connection handling.
//!
//! The read half of each TCP connection is owned by the servicer loop; the
//! write half lives behind [`Transport`] so handlers and coordinators can
//! reply concurrently.

use crate::abilities::Abilities;
use async_trait::async_trait;
use gearhive_protocol::{Id, Message, ProtocolError};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::watch;

/// Write side of a peer connection.
#[async_trait]
pub trait Transport: Send + Sync {
    fn id(&self) -> Id;

    async fn write_bytes(&self, data: &[u8]) -> io::Result<()>;

    /// Watch that flips to `true` once the connection is closed.
    fn closed(&self) -> watch::Receiver<bool>;

    async fn close(&self);

    /// Peer description for log lines.
    fn peer(&self) -> String;
}

pub struct TcpTransport {
    id: Id,
    peer: SocketAddr,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    closed_tx: watch::Sender<bool>,
}

impl TcpTransport {
    pub fn new(id: Id, peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            id,
            peer,
            writer: tokio::sync::Mutex::new(writer),
            closed_tx,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn id(&self) -> Id {
        self.id
    }

    async fn write_bytes(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    async fn close(&self) {
        if self.closed_tx.send_replace(true) {
            return;
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

/// A registered connection plus its per-connection mutable state. The
/// ability set, option flags and client id share one mutex; each is only
/// mutated in response to a packet from this connection.
pub struct ServerConn {
    transport: Arc<dyn Transport>,
    state: Mutex<ConnState>,
}

#[derive(Default)]
struct ConnState {
    abilities: Abilities,
    forward_exceptions: bool,
    client_id: String,
}

impl ServerConn {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            state: Mutex::new(ConnState::default()),
        })
    }

    pub fn id(&self) -> Id {
        self.transport.id()
    }

    pub fn closed(&self) -> watch::Receiver<bool> {
        self.transport.closed()
    }

    pub fn is_closed(&self) -> bool {
        *self.transport.closed().borrow()
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    pub async fn write_bytes(&self, data: &[u8]) -> io::Result<()> {
        self.transport.write_bytes(data).await
    }

    pub async fn write_message(&self, msg: &Message) -> Result<(), ProtocolError> {
        let bytes = msg.encode()?;
        self.transport.write_bytes(&bytes).await?;
        Ok(())
    }

    pub async fn write_text(&self, content: &str) -> io::Result<()> {
        self.transport.write_bytes(content.as_bytes()).await
    }

    pub fn can_do(&self, function: &str, timeout: Duration) {
        self.state().abilities.can_do(function, timeout);
    }

    pub fn cant_do(&self, function: &str) {
        self.state().abilities.cant_do(function);
    }

    pub fn reset_abilities(&self) {
        self.state().abilities.reset();
    }

    pub fn supports(&self, function: &str) -> bool {
        self.state().abilities.supports(function)
    }

    pub fn has_abilities(&self) -> bool {
        !self.state().abilities.is_empty()
    }

    pub fn abilities_snapshot(&self) -> HashMap<String, Duration> {
        self.state().abilities.snapshot()
    }

    pub fn set_forward_exceptions(&self, on: bool) {
        self.state().forward_exceptions = on;
    }

    pub fn forward_exceptions(&self) -> bool {
        self.state().forward_exceptions
    }

    pub fn set_client_id(&self, label: &str) {
        self.state().client_id = label.to_string();
    }

    pub fn client_id(&self) -> String {
        self.state().client_id.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Display for ServerConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.transport.peer(), self.id())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use gearhive_protocol::{read_frame, Frame};
    use tokio::sync::mpsc;

    /// Channel-backed transport capturing every frame the broker writes, for
    /// unit tests.
    pub(crate) struct MockTransport {
        id: Id,
        written: mpsc::UnboundedSender<Message>,
        closed_tx: watch::Sender<bool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn id(&self) -> Id {
            self.id
        }

        async fn write_bytes(&self, data: &[u8]) -> io::Result<()> {
            let mut reader = data;
            match read_frame(&mut reader).await {
                Ok(Some(Frame::Packet(msg))) => {
                    let _ = self.written.send(msg);
                    Ok(())
                }
                Ok(Some(Frame::Text(_))) | Ok(None) => Ok(()),
                Err(err) => Err(io::Error::new(io::ErrorKind::InvalidData, err.to_string())),
            }
        }

        fn closed(&self) -> watch::Receiver<bool> {
            self.closed_tx.subscribe()
        }

        async fn close(&self) {
            let _ = self.closed_tx.send_replace(true);
        }

        fn peer(&self) -> String {
            "mock".to_string()
        }
    }

    /// A mock-backed `ServerConn` and the receiver of everything written to
    /// it.
    pub(crate) fn mock_conn() -> (Arc<ServerConn>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        let transport = Arc::new(MockTransport {
            id: Id::random(),
            written: tx,
            closed_tx,
        });
        (ServerConn::new(transport), rx)
    }
}
