//! PRE_SLEEP handler.

use super::PacketHandler;
use crate::conn::ServerConn;
use crate::error::HandlerError;
use crate::sleep::SleepSet;
use async_trait::async_trait;
use gearhive_protocol::{Message, PacketKind};
use std::sync::Arc;

pub struct SleepHandler {
    sleep: Arc<SleepSet>,
}

impl SleepHandler {
    pub fn new(sleep: Arc<SleepSet>) -> Self {
        Self { sleep }
    }
}

#[async_trait]
impl PacketHandler for SleepHandler {
    fn packet_kinds(&self) -> &'static [PacketKind] {
        &[PacketKind::PreSleep]
    }

    async fn handle(&self, _msg: &Message, conn: &Arc<ServerConn>) -> Result<(), HandlerError> {
        self.sleep.add(conn.id());
        Ok(())
    }
}
