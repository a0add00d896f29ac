//! ECHO_REQ handler.

use super::PacketHandler;
use crate::conn::ServerConn;
use crate::error::HandlerError;
use async_trait::async_trait;
use gearhive_protocol::{Message, PacketKind};
use std::sync::Arc;

pub struct EchoHandler;

#[async_trait]
impl PacketHandler for EchoHandler {
    fn packet_kinds(&self) -> &'static [PacketKind] {
        &[PacketKind::EchoReq]
    }

    async fn handle(&self, msg: &Message, conn: &Arc<ServerConn>) -> Result<(), HandlerError> {
        let reply = Message::response(PacketKind::EchoRes, msg.arguments.clone());
        conn.write_message(&reply).await?;
        Ok(())
    }
}
