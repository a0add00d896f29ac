//! SUBMIT_JOB family handler.
//!
//! Priority and background mode derive from the packet kind; the reduce
//! kinds carry an extra reducer argument before the data. A successful
//! submit wakes at most one sleeping worker able to run the function.

use super::PacketHandler;
use crate::conn::ServerConn;
use crate::error::HandlerError;
use crate::job::{Job, Priority};
use crate::jobs::JobsManager;
use crate::registry::ConnRegistry;
use crate::sleep::SleepSet;
use async_trait::async_trait;
use gearhive_protocol::{Id, Message, PacketKind};
use std::sync::Arc;
use tracing::debug;

pub struct SubmitJobHandler {
    jobs: Arc<JobsManager>,
    sleep: Arc<SleepSet>,
    registry: Arc<ConnRegistry>,
}

impl SubmitJobHandler {
    pub fn new(jobs: Arc<JobsManager>, sleep: Arc<SleepSet>, registry: Arc<ConnRegistry>) -> Self {
        Self {
            jobs,
            sleep,
            registry,
        }
    }

    /// Send a single NOOP to the first sleeping worker whose abilities cover
    /// `function`. At most one wake-up per submission.
    async fn wake_one_worker(&self, function: &str) {
        let noop = Message::response(PacketKind::Noop, vec![]);
        for worker_id in self.sleep.snapshot() {
            let Some(worker) = self.registry.get(worker_id) else {
                continue;
            };
            if !worker.supports(function) {
                continue;
            }
            if let Err(err) = worker.write_message(&noop).await {
                debug!(worker = %worker_id, %err, "NOOP write failed");
            }
            break;
        }
    }
}

#[async_trait]
impl PacketHandler for SubmitJobHandler {
    fn packet_kinds(&self) -> &'static [PacketKind] {
        &[
            PacketKind::SubmitJob,
            PacketKind::SubmitJobBg,
            PacketKind::SubmitJobHigh,
            PacketKind::SubmitJobHighBg,
            PacketKind::SubmitJobLow,
            PacketKind::SubmitJobLowBg,
            PacketKind::SubmitReduceJob,
            PacketKind::SubmitReduceJobBg,
        ]
    }

    async fn handle(&self, msg: &Message, conn: &Arc<ServerConn>) -> Result<(), HandlerError> {
        let background = matches!(
            msg.kind,
            PacketKind::SubmitJobBg
                | PacketKind::SubmitJobHighBg
                | PacketKind::SubmitJobLowBg
                | PacketKind::SubmitReduceJobBg
        );
        let priority = match msg.kind {
            PacketKind::SubmitJobHigh | PacketKind::SubmitJobHighBg => Priority::High,
            PacketKind::SubmitJobLow | PacketKind::SubmitJobLowBg => Priority::Low,
            _ => Priority::Mid,
        };
        let reduce = matches!(
            msg.kind,
            PacketKind::SubmitReduceJob | PacketKind::SubmitReduceJobBg
        );
        let (reducer, data) = if reduce {
            (msg.arguments[2].clone(), msg.arguments[3].clone())
        } else {
            (String::new(), msg.arguments[2].clone())
        };

        let job = Job {
            function: msg.arguments[0].clone(),
            data,
            handle: Id::random(),
            unique_id: msg.arguments[1].clone(),
            priority,
            reducer,
        };
        let listening = (!background).then_some(conn);
        let handle = self
            .jobs
            .submit(&job, listening)
            .await
            .map_err(HandlerError::job_manager)?;

        self.wake_one_worker(&job.function).await;

        let reply = Message::response(PacketKind::JobCreated, vec![handle.to_string()]);
        conn.write_message(&reply).await?;
        Ok(())
    }
}
