//! GRAB_JOB / GRAB_JOB_ALL handlers.

use super::PacketHandler;
use crate::conn::ServerConn;
use crate::error::HandlerError;
use crate::jobs::JobsManager;
use async_trait::async_trait;
use gearhive_protocol::{Message, PacketKind};
use std::sync::Arc;

pub struct GrabJobHandler {
    jobs: Arc<JobsManager>,
}

impl GrabJobHandler {
    pub fn new(jobs: Arc<JobsManager>) -> Self {
        Self { jobs }
    }
}

fn no_job() -> Message {
    Message::response(PacketKind::NoJob, vec![])
}

#[async_trait]
impl PacketHandler for GrabJobHandler {
    fn packet_kinds(&self) -> &'static [PacketKind] {
        &[PacketKind::GrabJob, PacketKind::GrabJobAll]
    }

    async fn handle(&self, msg: &Message, conn: &Arc<ServerConn>) -> Result<(), HandlerError> {
        let abilities = conn.abilities_snapshot();
        if abilities.is_empty() {
            conn.write_message(&no_job()).await?;
            return Ok(());
        }

        match self.jobs.grab(&abilities).await {
            Ok(Some(job)) => {
                let (kind, args) = match msg.kind {
                    PacketKind::GrabJobAll => (
                        PacketKind::JobAssignAll,
                        vec![
                            job.handle.to_string(),
                            job.function.clone(),
                            job.unique_id.clone(),
                            job.reducer.clone(),
                            job.data.clone(),
                        ],
                    ),
                    _ => (
                        PacketKind::JobAssign,
                        vec![job.handle.to_string(), job.function.clone(), job.data.clone()],
                    ),
                };
                conn.write_message(&Message::response(kind, args)).await?;
                Ok(())
            }
            Ok(None) => {
                conn.write_message(&no_job()).await?;
                Ok(())
            }
            Err(err) => Err(HandlerError::job_manager(err)),
        }
    }
}
