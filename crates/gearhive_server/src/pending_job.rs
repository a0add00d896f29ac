//! Pending jobs and their per-job coordinators.
//!
//! A pending job has two states: dispatched (to a worker) and undispatched.
//! Undispatched entries are plain table rows; once a worker grabs the job, a
//! dedicated coordinator task takes ownership of the attached clients and
//! multiplexes status updates, status queries, late attachments, client
//! disconnects and the per-function timeout.

use crate::conn::ServerConn;
use crate::jobs::{JobStatus, JobTable};
use gearhive_protocol::{Id, Magic, Message, PacketKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(crate) const JOB_TIMEOUT_ERR_MSG: &str = "Job execution timeout";

/// Command channels hold one message; senders block (bounded by their own
/// deadline) until the coordinator drains the slot.
const COMMAND_CHANNEL_CAPACITY: usize = 1;

/// Disconnect sentinels from attachment watchers; sized so watchers never
/// stall the coordinator.
const CLOSED_CHANNEL_CAPACITY: usize = 64;

/// Request to attach a late-coalescing client to a running job.
pub(crate) struct AttachRequest {
    pub conn: Arc<ServerConn>,
    pub reply: oneshot::Sender<()>,
}

/// Channel handles kept in the pending-job table once a job is dispatched.
#[derive(Clone)]
pub(crate) struct CoordinatorHandles {
    pub status_update: mpsc::Sender<Message>,
    pub attach: mpsc::Sender<AttachRequest>,
    pub status_query: mpsc::Sender<oneshot::Sender<JobStatus>>,
    pub conns_query: mpsc::Sender<oneshot::Sender<Vec<Id>>>,
}

impl CoordinatorHandles {
    /// Register a late client on the running coordinator. `true` means the
    /// coordinator accepted the attachment within `deadline`; `false` means
    /// it is gone or did not answer in time.
    pub async fn register_conn(&self, conn: Arc<ServerConn>, deadline: Duration) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = AttachRequest {
            conn,
            reply: reply_tx,
        };
        let attached = tokio::time::timeout(deadline, async {
            if self.attach.send(request).await.is_err() {
                return false;
            }
            reply_rx.await.is_ok()
        })
        .await;
        matches!(attached, Ok(true))
    }
}

/// In-memory record of a submitted, not-yet-finished job.
pub(crate) struct PendingJob {
    pub handle: Id,
    pub unique_id: String,
    /// Clients awaiting results. Owned by the table while undispatched, by
    /// the coordinator afterwards.
    pub client_conns: HashMap<Id, Arc<ServerConn>>,
    pub dispatched: bool,
    pub channels: Option<CoordinatorHandles>,
}

impl PendingJob {
    pub fn new(handle: Id, unique_id: String) -> Self {
        Self {
            handle,
            unique_id,
            client_conns: HashMap::new(),
            dispatched: false,
            channels: None,
        }
    }

    /// Drop attachments whose connection has already closed.
    pub fn prune_closed(&mut self) {
        self.client_conns.retain(|_, conn| !conn.is_closed());
    }
}

/// Event loop owning one dispatched job.
pub(crate) struct Coordinator {
    handle: Id,
    unique_id: String,
    conns: HashMap<Id, Arc<ServerConn>>,
    numerator: i64,
    denominator: i64,
    completed: bool,
    timed_out: bool,
    status_update: mpsc::Receiver<Message>,
    attach: mpsc::Receiver<AttachRequest>,
    status_query: mpsc::Receiver<oneshot::Sender<JobStatus>>,
    conns_query: mpsc::Receiver<oneshot::Sender<Vec<Id>>>,
    closed_tx: mpsc::Sender<Id>,
    closed_rx: mpsc::Receiver<Id>,
    watchers: HashMap<Id, JoinHandle<()>>,
}

impl Coordinator {
    /// Build the coordinator and the table-side channel handles. Called
    /// under the table mutex so the ownership handoff is atomic.
    pub fn install(
        handle: Id,
        unique_id: String,
        conns: HashMap<Id, Arc<ServerConn>>,
    ) -> (CoordinatorHandles, Coordinator) {
        let (status_update_tx, status_update_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (attach_tx, attach_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (status_query_tx, status_query_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (conns_query_tx, conns_query_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (closed_tx, closed_rx) = mpsc::channel(CLOSED_CHANNEL_CAPACITY);

        let handles = CoordinatorHandles {
            status_update: status_update_tx,
            attach: attach_tx,
            status_query: status_query_tx,
            conns_query: conns_query_tx,
        };
        let coordinator = Coordinator {
            handle,
            unique_id,
            conns,
            numerator: 0,
            denominator: 0,
            completed: false,
            timed_out: false,
            status_update: status_update_rx,
            attach: attach_rx,
            status_query: status_query_rx,
            conns_query: conns_query_rx,
            closed_tx,
            closed_rx,
            watchers: HashMap::new(),
        };
        (handles, coordinator)
    }

    pub async fn run(
        mut self,
        timeout: Duration,
        table: Arc<Mutex<JobTable>>,
        active: Arc<AtomicI32>,
    ) {
        debug!(handle = %self.handle, unique_id = %self.unique_id, "job started");
        let initial: Vec<_> = self.conns.values().cloned().collect();
        for conn in initial {
            self.spawn_watcher(&conn);
        }

        let timeout_enabled = timeout > Duration::ZERO;
        let timer = tokio::time::sleep(timeout);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                Some(msg) = self.status_update.recv() => {
                    if self.handle_status_update(msg).await {
                        self.completed = true;
                        break;
                    }
                }
                () = &mut timer, if timeout_enabled => {
                    debug!(handle = %self.handle, "job timed out");
                    self.timed_out = true;
                    if !self.conns.is_empty() {
                        let msg = Message::response(
                            PacketKind::WorkException,
                            vec![self.handle.to_string(), JOB_TIMEOUT_ERR_MSG.to_string()],
                        );
                        self.broadcast(&msg).await;
                    }
                    break;
                }
                Some(request) = self.attach.recv() => {
                    self.spawn_watcher(&request.conn);
                    self.conns.insert(request.conn.id(), request.conn);
                    let _ = request.reply.send(());
                }
                Some(reply) = self.status_query.recv() => {
                    let _ = reply.send(JobStatus {
                        known: true,
                        running: true,
                        numerator: self.numerator,
                        denominator: self.denominator,
                        waiting_count: self.conns.len(),
                        handle: Some(self.handle),
                    });
                }
                Some(reply) = self.conns_query.recv() => {
                    let _ = reply.send(self.conns.keys().copied().collect());
                }
                Some(conn_id) = self.closed_rx.recv() => {
                    self.conns.remove(&conn_id);
                    if let Some(watcher) = self.watchers.remove(&conn_id) {
                        watcher.abort();
                    }
                }
            }
        }

        self.finish(table, active).await;
    }

    /// Apply one worker packet: update progress, fan the RES form out to the
    /// attached clients. Returns `true` when the packet is terminal.
    async fn handle_status_update(&mut self, mut msg: Message) -> bool {
        let completed = matches!(
            msg.kind,
            PacketKind::WorkComplete | PacketKind::WorkFail | PacketKind::WorkException
        );
        if msg.kind == PacketKind::WorkStatus {
            let parsed = (
                msg.arguments.get(1).and_then(|arg| arg.parse::<i64>().ok()),
                msg.arguments.get(2).and_then(|arg| arg.parse::<i64>().ok()),
            );
            if let (Some(numerator), Some(denominator)) = parsed {
                self.numerator = numerator;
                self.denominator = denominator;
            }
        }

        msg.magic = Magic::Res;
        if msg.kind == PacketKind::WorkException {
            self.broadcast_exception(&msg).await;
        } else {
            self.broadcast(&msg).await;
        }
        completed
    }

    /// Encode once, write per attachment. Writes are best-effort; dead
    /// attachments are removed by the closed-signal path, not here.
    async fn broadcast(&self, msg: &Message) {
        let bytes = match msg.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(handle = %self.handle, %err, "encode {} failed", msg);
                return;
            }
        };
        for conn in self.conns.values() {
            if let Err(err) = conn.write_bytes(&bytes).await {
                debug!(conn = %conn.id(), %err, "broadcast write failed");
            }
        }
    }

    /// WORK_EXCEPTION fan-out: connections that opted in receive the
    /// exception itself, the rest a synthesized WORK_FAIL. Each alternate
    /// payload is encoded at most once.
    async fn broadcast_exception(&self, msg: &Message) {
        let mut exception_bytes: Option<Vec<u8>> = None;
        let mut fail_bytes: Option<Vec<u8>> = None;
        for conn in self.conns.values() {
            let forward = conn.forward_exceptions();
            let slot = if forward {
                &mut exception_bytes
            } else {
                &mut fail_bytes
            };
            if slot.is_none() {
                let alternate = if forward {
                    msg.clone()
                } else {
                    Message::response(PacketKind::WorkFail, vec![self.handle.to_string()])
                };
                match alternate.encode() {
                    Ok(bytes) => *slot = Some(bytes),
                    Err(err) => {
                        warn!(handle = %self.handle, %err, "encode {} failed", alternate);
                        continue;
                    }
                }
            }
            let Some(bytes) = slot.as_deref() else {
                continue;
            };
            if let Err(err) = conn.write_bytes(bytes).await {
                debug!(conn = %conn.id(), %err, "broadcast write failed");
            }
        }
    }

    /// Forward this connection's close signal into the shared
    /// attachment-closed channel.
    fn spawn_watcher(&mut self, conn: &Arc<ServerConn>) {
        let id = conn.id();
        let mut closed = conn.closed();
        let tx = self.closed_tx.clone();
        let watcher = tokio::spawn(async move {
            if closed.wait_for(|closed| *closed).await.is_ok() {
                let _ = tx.send(id).await;
            }
        });
        if let Some(stale) = self.watchers.insert(id, watcher) {
            stale.abort();
        }
    }

    /// Exit side effects, performed on every path out of the loop: the entry
    /// leaves both indexes, the watchers stop, the channels close (receivers
    /// drop with `self`) and the active-coordinator count goes down.
    async fn finish(self, table: Arc<Mutex<JobTable>>, active: Arc<AtomicI32>) {
        for watcher in self.watchers.values() {
            watcher.abort();
        }
        {
            let mut table = table.lock().await;
            table.remove(self.handle, &self.unique_id);
        }
        active.fetch_sub(1, Ordering::SeqCst);
        debug!(
            handle = %self.handle,
            completed = self.completed,
            timed_out = self.timed_out,
            "job done"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::testing::mock_conn;

    fn spawn_coordinator(
        conns: Vec<Arc<ServerConn>>,
        timeout: Duration,
    ) -> (Id, CoordinatorHandles, Arc<AtomicI32>) {
        let handle = Id::random();
        let conns = conns.into_iter().map(|c| (c.id(), c)).collect();
        let (handles, coordinator) = Coordinator::install(handle, "u1".to_string(), conns);
        let table = Arc::new(Mutex::new(JobTable::default()));
        let active = Arc::new(AtomicI32::new(1));
        tokio::spawn(coordinator.run(timeout, table, Arc::clone(&active)));
        (handle, handles, active)
    }

    async fn wait_for_exit(active: &AtomicI32) {
        for _ in 0..100 {
            if active.load(Ordering::SeqCst) == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("coordinator did not exit");
    }

    #[tokio::test]
    async fn work_status_updates_progress_and_broadcasts() {
        let (client, mut written) = mock_conn();
        let (handle, handles, _active) = spawn_coordinator(vec![client], Duration::ZERO);

        let update = Message::request(
            PacketKind::WorkStatus,
            vec![handle.to_string(), "3".to_string(), "10".to_string()],
        );
        handles.status_update.send(update).await.unwrap();

        let forwarded = written.recv().await.unwrap();
        assert_eq!(forwarded.magic, Magic::Res);
        assert_eq!(forwarded.kind, PacketKind::WorkStatus);
        assert_eq!(forwarded.arguments[1], "3");

        let (reply_tx, reply_rx) = oneshot::channel();
        handles.status_query.send(reply_tx).await.unwrap();
        let status = reply_rx.await.unwrap();
        assert!(status.known && status.running);
        assert_eq!((status.numerator, status.denominator), (3, 10));
        assert_eq!(status.waiting_count, 1);
    }

    #[tokio::test]
    async fn unparsable_progress_is_ignored() {
        let (client, mut written) = mock_conn();
        let (handle, handles, _active) = spawn_coordinator(vec![client], Duration::ZERO);

        let update = Message::request(
            PacketKind::WorkStatus,
            vec![handle.to_string(), "x".to_string(), "10".to_string()],
        );
        handles.status_update.send(update).await.unwrap();
        written.recv().await.unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        handles.status_query.send(reply_tx).await.unwrap();
        let status = reply_rx.await.unwrap();
        assert_eq!((status.numerator, status.denominator), (0, 0));
    }

    #[tokio::test]
    async fn work_complete_broadcasts_and_exits() {
        let (client1, mut written1) = mock_conn();
        let (client2, mut written2) = mock_conn();
        let (handle, handles, active) =
            spawn_coordinator(vec![client1, client2], Duration::ZERO);

        let complete = Message::request(
            PacketKind::WorkComplete,
            vec![handle.to_string(), "result".to_string()],
        );
        handles.status_update.send(complete).await.unwrap();

        for written in [&mut written1, &mut written2] {
            let msg = written.recv().await.unwrap();
            assert_eq!(msg.kind, PacketKind::WorkComplete);
            assert_eq!(msg.magic, Magic::Res);
            assert_eq!(msg.arguments, vec![handle.to_string(), "result".to_string()]);
        }
        wait_for_exit(&active).await;

        // the coordinator is gone, further updates are refused
        let late = Message::request(PacketKind::WorkFail, vec![handle.to_string()]);
        assert!(handles.status_update.send(late).await.is_err());
    }

    #[tokio::test]
    async fn exception_respects_forward_flag() {
        let (opted_in, mut written_in) = mock_conn();
        let (opted_out, mut written_out) = mock_conn();
        opted_in.set_forward_exceptions(true);
        let (handle, handles, active) =
            spawn_coordinator(vec![opted_in, opted_out], Duration::ZERO);

        let exception = Message::request(
            PacketKind::WorkException,
            vec![handle.to_string(), "boom".to_string()],
        );
        handles.status_update.send(exception).await.unwrap();

        let msg = written_in.recv().await.unwrap();
        assert_eq!(msg.kind, PacketKind::WorkException);
        assert_eq!(msg.arguments, vec![handle.to_string(), "boom".to_string()]);

        let msg = written_out.recv().await.unwrap();
        assert_eq!(msg.kind, PacketKind::WorkFail);
        assert_eq!(msg.arguments, vec![handle.to_string()]);

        wait_for_exit(&active).await;
    }

    #[tokio::test]
    async fn timeout_notifies_attached_clients() {
        let (client, mut written) = mock_conn();
        let (handle, _handles, active) =
            spawn_coordinator(vec![client], Duration::from_millis(50));

        let msg = written.recv().await.unwrap();
        assert_eq!(msg.kind, PacketKind::WorkException);
        assert_eq!(
            msg.arguments,
            vec![handle.to_string(), JOB_TIMEOUT_ERR_MSG.to_string()]
        );
        wait_for_exit(&active).await;
    }

    #[tokio::test]
    async fn zero_timeout_never_fires() {
        let (client, mut written) = mock_conn();
        let (_handle, handles, _active) = spawn_coordinator(vec![client], Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let (reply_tx, reply_rx) = oneshot::channel();
        handles.status_query.send(reply_tx).await.unwrap();
        assert!(reply_rx.await.unwrap().running);
        assert!(written.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_attachment_receives_completion() {
        let (first, _written_first) = mock_conn();
        let (handle, handles, _active) = spawn_coordinator(vec![first], Duration::ZERO);

        let (late, mut written_late) = mock_conn();
        assert!(
            handles
                .register_conn(Arc::clone(&late), Duration::from_millis(100))
                .await
        );

        let complete = Message::request(
            PacketKind::WorkComplete,
            vec![handle.to_string(), "done".to_string()],
        );
        handles.status_update.send(complete).await.unwrap();
        assert_eq!(
            written_late.recv().await.unwrap().kind,
            PacketKind::WorkComplete
        );
    }

    #[tokio::test]
    async fn disconnected_client_is_pruned() {
        let (staying, _written_staying) = mock_conn();
        let (leaving, _written_leaving) = mock_conn();
        let (_handle, handles, _active) =
            spawn_coordinator(vec![staying, Arc::clone(&leaving)], Duration::ZERO);

        leaving.close().await;

        // the watcher forwards the close; poll until the attachment is gone
        for _ in 0..100 {
            let (reply_tx, reply_rx) = oneshot::channel();
            handles.conns_query.send(reply_tx).await.unwrap();
            let conns = reply_rx.await.unwrap();
            if conns.len() == 1 {
                assert!(!conns.contains(&leaving.id()));
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("closed attachment was not pruned");
    }
}
