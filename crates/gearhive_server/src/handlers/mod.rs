//! Protocol handlers: one per packet-kind family, plus the dispatch
//! registry that validates packets against the server role and routes them.

pub mod can_do;
pub mod echo;
pub mod get_status;
pub mod grab_job;
pub mod option;
pub mod pre_sleep;
pub mod set_client_id;
pub mod submit_job;
pub mod work_status;

use crate::conn::ServerConn;
use crate::error::HandlerError;
use async_trait::async_trait;
use gearhive_protocol::{Message, PacketKind, ProtocolError, Role};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub use can_do::CanDoHandler;
pub use echo::EchoHandler;
pub use get_status::GetStatusHandler;
pub use grab_job::GrabJobHandler;
pub use option::OptionHandler;
pub use pre_sleep::SleepHandler;
pub use set_client_id::SetClientIdHandler;
pub use submit_job::SubmitJobHandler;
pub use work_status::WorkStatusHandler;

/// A handler for one family of packet kinds.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    fn packet_kinds(&self) -> &'static [PacketKind];

    async fn handle(&self, msg: &Message, conn: &Arc<ServerConn>) -> Result<(), HandlerError>;
}

/// Maps packet kinds to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<PacketKind, Arc<dyn PacketHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn PacketHandler>) {
        for kind in handler.packet_kinds() {
            if self.handlers.insert(*kind, Arc::clone(&handler)).is_some() {
                warn!(%kind, "packet kind registered twice");
            }
        }
    }

    /// Validate one message for the server role and route it to its handler.
    pub async fn dispatch(
        &self,
        msg: &Message,
        conn: &Arc<ServerConn>,
    ) -> Result<(), HandlerError> {
        msg.validate(Role::Server)?;
        let handler = self.handlers.get(&msg.kind).ok_or(HandlerError::Protocol(
            ProtocolError::InvalidKind(msg.kind.as_u32()),
        ))?;
        handler.handle(msg, conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::testing::mock_conn;
    use gearhive_protocol::Magic;

    struct NoopHandler;

    #[async_trait]
    impl PacketHandler for NoopHandler {
        fn packet_kinds(&self) -> &'static [PacketKind] {
            &[PacketKind::EchoReq]
        }

        async fn handle(
            &self,
            _msg: &Message,
            _conn: &Arc<ServerConn>,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn rejects_res_packets_inbound() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(NoopHandler));
        let (conn, _written) = mock_conn();

        let msg = Message {
            magic: Magic::Res,
            kind: PacketKind::EchoReq,
            arguments: vec!["x".to_string()],
        };
        let err = registry.dispatch(&msg, &conn).await.unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Protocol(ProtocolError::InvalidRole { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_wrong_arity() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(NoopHandler));
        let (conn, _written) = mock_conn();

        let msg = Message::request(PacketKind::GetStatus, vec![]);
        let err = registry.dispatch(&msg, &conn).await.unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Protocol(ProtocolError::InvalidArity { .. })
        ));
    }

    #[tokio::test]
    async fn unrouted_kind_is_an_error() {
        let registry = HandlerRegistry::new();
        let (conn, _written) = mock_conn();

        let msg = Message::request(PacketKind::PreSleep, vec![]);
        let err = registry.dispatch(&msg, &conn).await.unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Protocol(ProtocolError::InvalidKind(_))
        ));
    }

    #[tokio::test]
    async fn routed_kind_reaches_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(NoopHandler));
        let (conn, _written) = mock_conn();

        let msg = Message::request(PacketKind::EchoReq, vec!["ping".to_string()]);
        registry.dispatch(&msg, &conn).await.unwrap();
    }
}
