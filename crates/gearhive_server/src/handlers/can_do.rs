//! CAN_DO / CAN_DO_TIMEOUT / CANT_DO / RESET_ABILITIES handlers.

use super::PacketHandler;
use crate::conn::ServerConn;
use crate::error::HandlerError;
use anyhow::anyhow;
use async_trait::async_trait;
use gearhive_protocol::{Message, PacketKind};
use std::sync::Arc;
use std::time::Duration;

pub struct CanDoHandler;

#[async_trait]
impl PacketHandler for CanDoHandler {
    fn packet_kinds(&self) -> &'static [PacketKind] {
        &[
            PacketKind::CanDo,
            PacketKind::CanDoTimeout,
            PacketKind::CantDo,
            PacketKind::ResetAbilities,
        ]
    }

    async fn handle(&self, msg: &Message, conn: &Arc<ServerConn>) -> Result<(), HandlerError> {
        match msg.kind {
            PacketKind::CanDo => conn.can_do(&msg.arguments[0], Duration::ZERO),
            PacketKind::CanDoTimeout => {
                let millis: u64 = msg.arguments[1]
                    .parse()
                    .map_err(|err| anyhow!("invalid CAN_DO_TIMEOUT timeout: {err}"))?;
                conn.can_do(&msg.arguments[0], Duration::from_millis(millis));
            }
            PacketKind::CantDo => conn.cant_do(&msg.arguments[0]),
            PacketKind::ResetAbilities => conn.reset_abilities(),
            _ => {}
        }
        Ok(())
    }
}
