//! WORK_* handlers: forward worker packets into the job's coordinator.

use super::PacketHandler;
use crate::conn::ServerConn;
use crate::error::HandlerError;
use crate::jobs::JobsManager;
use async_trait::async_trait;
use gearhive_protocol::{Id, Message, PacketKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct WorkStatusHandler {
    jobs: Arc<JobsManager>,
    request_timeout: Duration,
}

impl WorkStatusHandler {
    pub fn new(jobs: Arc<JobsManager>, request_timeout: Duration) -> Self {
        Self {
            jobs,
            request_timeout,
        }
    }
}

#[async_trait]
impl PacketHandler for WorkStatusHandler {
    fn packet_kinds(&self) -> &'static [PacketKind] {
        &[
            PacketKind::WorkStatus,
            PacketKind::WorkData,
            PacketKind::WorkWarning,
            PacketKind::WorkComplete,
            PacketKind::WorkFail,
            PacketKind::WorkException,
        ]
    }

    async fn handle(&self, msg: &Message, _conn: &Arc<ServerConn>) -> Result<(), HandlerError> {
        let handle = Id::parse(&msg.arguments[0])?;
        let accepted = self
            .jobs
            .update_status(handle, msg.clone(), self.request_timeout)
            .await;
        if !accepted {
            debug!(%handle, kind = %msg.kind, "status update dropped, no live coordinator");
        }
        Ok(())
    }
}
