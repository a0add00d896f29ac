//! OPTION_REQ handler.

use super::PacketHandler;
use crate::conn::ServerConn;
use crate::error::HandlerError;
use async_trait::async_trait;
use gearhive_protocol::{Message, PacketKind};
use std::sync::Arc;

const EXCEPTIONS_OPTION: &str = "exceptions";

pub struct OptionHandler;

#[async_trait]
impl PacketHandler for OptionHandler {
    fn packet_kinds(&self) -> &'static [PacketKind] {
        &[PacketKind::OptionReq]
    }

    async fn handle(&self, msg: &Message, conn: &Arc<ServerConn>) -> Result<(), HandlerError> {
        let mut applied = "";
        if msg.arguments[0].contains(EXCEPTIONS_OPTION) {
            conn.set_forward_exceptions(true);
            applied = EXCEPTIONS_OPTION;
        }
        let reply = Message::response(PacketKind::OptionRes, vec![applied.to_string()]);
        conn.write_message(&reply).await?;
        Ok(())
    }
}
