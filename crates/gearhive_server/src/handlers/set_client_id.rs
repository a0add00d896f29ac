//! SET_CLIENT_ID handler.

use super::PacketHandler;
use crate::conn::ServerConn;
use crate::error::HandlerError;
use async_trait::async_trait;
use gearhive_protocol::{Message, PacketKind};
use std::sync::Arc;

pub struct SetClientIdHandler;

#[async_trait]
impl PacketHandler for SetClientIdHandler {
    fn packet_kinds(&self) -> &'static [PacketKind] {
        &[PacketKind::SetClientId]
    }

    async fn handle(&self, msg: &Message, conn: &Arc<ServerConn>) -> Result<(), HandlerError> {
        conn.set_client_id(&msg.arguments[0]);
        Ok(())
    }
}
