//! GET_STATUS / GET_STATUS_UNIQUE handlers.

use super::PacketHandler;
use crate::conn::ServerConn;
use crate::error::HandlerError;
use crate::jobs::JobsManager;
use async_trait::async_trait;
use gearhive_protocol::{Id, Message, PacketKind};
use std::sync::Arc;
use std::time::Duration;

pub struct GetStatusHandler {
    jobs: Arc<JobsManager>,
    request_timeout: Duration,
}

impl GetStatusHandler {
    pub fn new(jobs: Arc<JobsManager>, request_timeout: Duration) -> Self {
        Self {
            jobs,
            request_timeout,
        }
    }
}

#[async_trait]
impl PacketHandler for GetStatusHandler {
    fn packet_kinds(&self) -> &'static [PacketKind] {
        &[PacketKind::GetStatus, PacketKind::GetStatusUnique]
    }

    async fn handle(&self, msg: &Message, conn: &Arc<ServerConn>) -> Result<(), HandlerError> {
        let (handle, unique_id, reply_kind) = match msg.kind {
            PacketKind::GetStatus => (
                Some(Id::parse(&msg.arguments[0])?),
                String::new(),
                PacketKind::StatusRes,
            ),
            _ => (None, msg.arguments[0].clone(), PacketKind::StatusResUnique),
        };

        let status = self
            .jobs
            .get_status(handle, &unique_id, self.request_timeout)
            .await;

        let mut known = "0".to_string();
        let mut running = "0".to_string();
        let mut numerator = "0".to_string();
        let mut denominator = "0".to_string();
        let mut waiting = "0".to_string();
        if status.known {
            known = "1".to_string();
            waiting = status.waiting_count.to_string();
            if status.running {
                running = "1".to_string();
                numerator = status.numerator.to_string();
                denominator = status.denominator.to_string();
            }
        }
        let handle_arg = status.handle.map(|h| h.to_string()).unwrap_or_default();

        let mut args = vec![handle_arg, known, running, numerator, denominator];
        if msg.kind == PacketKind::GetStatusUnique {
            args.push(waiting);
        }
        conn.write_message(&Message::response(reply_kind, args))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::testing::mock_conn;
    use crate::job::{Job, Priority};
    use crate::queue::testing::MockQueue;
    use crate::queue::Queue;
    use std::collections::HashMap;

    const DEADLINE: Duration = Duration::from_millis(500);

    fn job(unique_id: &str) -> Job {
        Job {
            function: "echo".to_string(),
            data: "x".to_string(),
            handle: Id::random(),
            unique_id: unique_id.to_string(),
            priority: Priority::Mid,
            reducer: String::new(),
        }
    }

    #[tokio::test]
    async fn unknown_job_answers_all_zeroes() {
        let jobs = Arc::new(JobsManager::new(MockQueue::new()));
        let handler = GetStatusHandler::new(jobs, DEADLINE);
        let (client, mut written) = mock_conn();

        let handle = Id::random();
        let msg = Message::request(PacketKind::GetStatus, vec![handle.to_string()]);
        handler.handle(&msg, &client).await.unwrap();

        let reply = written.recv().await.unwrap();
        assert_eq!(reply.kind, PacketKind::StatusRes);
        assert_eq!(
            reply.arguments,
            vec![handle.to_string(), "0".into(), "0".into(), "0".into(), "0".into()]
        );
    }

    #[tokio::test]
    async fn queued_job_is_known_but_not_running() {
        let queue = MockQueue::new();
        let jobs = Arc::new(JobsManager::new(Arc::clone(&queue) as Arc<dyn Queue>));
        let handler = GetStatusHandler::new(Arc::clone(&jobs), DEADLINE);
        let (client, mut written) = mock_conn();

        let j = job("u1");
        jobs.submit(&j, Some(&client)).await.unwrap();

        let msg = Message::request(PacketKind::GetStatus, vec![j.handle.to_string()]);
        handler.handle(&msg, &client).await.unwrap();

        let reply = written.recv().await.unwrap();
        assert_eq!(
            reply.arguments,
            vec![j.handle.to_string(), "1".into(), "0".into(), "0".into(), "0".into()]
        );
    }

    #[tokio::test]
    async fn running_job_reports_progress() {
        let queue = MockQueue::new();
        let jobs = Arc::new(JobsManager::new(Arc::clone(&queue) as Arc<dyn Queue>));
        let handler = GetStatusHandler::new(Arc::clone(&jobs), DEADLINE);
        let (client, mut written) = mock_conn();

        let j = job("u1");
        jobs.submit(&j, Some(&client)).await.unwrap();
        queue.script(j.clone());
        jobs.grab(&HashMap::from([("echo".to_string(), Duration::ZERO)]))
            .await
            .unwrap()
            .unwrap();
        let update = Message::request(
            PacketKind::WorkStatus,
            vec![j.handle.to_string(), "3".to_string(), "10".to_string()],
        );
        assert!(jobs.update_status(j.handle, update, DEADLINE).await);
        // drain the forwarded WORK_STATUS broadcast
        written.recv().await.unwrap();

        let msg = Message::request(PacketKind::GetStatus, vec![j.handle.to_string()]);
        handler.handle(&msg, &client).await.unwrap();

        let reply = written.recv().await.unwrap();
        assert_eq!(reply.kind, PacketKind::StatusRes);
        assert_eq!(
            reply.arguments,
            vec![j.handle.to_string(), "1".into(), "1".into(), "3".into(), "10".into()]
        );
    }

    #[tokio::test]
    async fn unique_variant_appends_waiting_count() {
        let queue = MockQueue::new();
        let jobs = Arc::new(JobsManager::new(Arc::clone(&queue) as Arc<dyn Queue>));
        let handler = GetStatusHandler::new(Arc::clone(&jobs), DEADLINE);
        let (client, mut written) = mock_conn();

        let j = job("u7");
        jobs.submit(&j, Some(&client)).await.unwrap();

        let msg = Message::request(PacketKind::GetStatusUnique, vec!["u7".to_string()]);
        handler.handle(&msg, &client).await.unwrap();

        let reply = written.recv().await.unwrap();
        assert_eq!(reply.kind, PacketKind::StatusResUnique);
        // the handle argument is empty for a queued job queried by unique id
        assert_eq!(
            reply.arguments,
            vec![String::new(), "1".into(), "0".into(), "0".into(), "0".into(), "1".into()]
        );
    }

    #[tokio::test]
    async fn malformed_handle_is_an_error() {
        let jobs = Arc::new(JobsManager::new(MockQueue::new()));
        let handler = GetStatusHandler::new(jobs, DEADLINE);
        let (client, _written) = mock_conn();

        let msg = Message::request(PacketKind::GetStatus, vec!["zzz".to_string()]);
        assert!(handler.handle(&msg, &client).await.is_err());
    }
}
