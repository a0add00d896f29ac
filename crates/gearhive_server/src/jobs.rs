//! Jobs manager: submit, grab, status query and status update across the
//! queue, the pending-job table and the per-job coordinators.

use crate::conn::ServerConn;
use crate::job::Job;
use crate::pending_job::{Coordinator, PendingJob};
use crate::queue::{Queue, QueueError};
use gearhive_protocol::{Id, Message};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

/// Deadline for attaching a late submitter to a running coordinator,
/// independent of the per-request deadline.
const ATTACH_DEADLINE: Duration = Duration::from_millis(100);

/// Externally visible status of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStatus {
    pub known: bool,
    pub running: bool,
    pub numerator: i64,
    pub denominator: i64,
    /// Number of attached client connections.
    pub waiting_count: usize,
    pub handle: Option<Id>,
}

impl JobStatus {
    fn unknown(handle: Option<Id>) -> Self {
        JobStatus {
            handle,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum JobsError {
    #[error("job not found")]
    JobNotFound,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Both indexes over the live jobs. The unique-id index only carries
/// non-empty unique ids; both indexes always resolve to the same entry.
#[derive(Default)]
pub(crate) struct JobTable {
    pub by_handle: HashMap<Id, PendingJob>,
    pub by_unique: HashMap<String, Id>,
}

impl JobTable {
    pub fn insert(&mut self, entry: PendingJob) {
        if !entry.unique_id.is_empty() {
            self.by_unique.insert(entry.unique_id.clone(), entry.handle);
        }
        self.by_handle.insert(entry.handle, entry);
    }

    /// Remove the entry for `handle`. The unique-id index is only cleared
    /// when it still points at this entry; a coalescing fallthrough may have
    /// re-bound the unique id to a newer job while the old coordinator was
    /// draining.
    pub fn remove(&mut self, handle: Id, unique_id: &str) {
        self.by_handle.remove(&handle);
        if !unique_id.is_empty() && self.by_unique.get(unique_id) == Some(&handle) {
            self.by_unique.remove(unique_id);
        }
    }
}

pub struct JobsManager {
    queue: Arc<dyn Queue>,
    table: Arc<Mutex<JobTable>>,
    active_coordinators: Arc<AtomicI32>,
}

impl JobsManager {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        Self {
            queue,
            table: Arc::new(Mutex::new(JobTable::default())),
            active_coordinators: Arc::new(AtomicI32::new(0)),
        }
    }

    /// Submit a job, coalescing onto an existing pending job with the same
    /// non-empty unique id. Returns the handle the client should observe.
    ///
    /// `listening_conn` is absent for background submissions; when present
    /// it is attached (deduplicated by connection id) to whichever entry
    /// ends up owning the unique id.
    pub async fn submit(
        &self,
        job: &Job,
        listening_conn: Option<&Arc<ServerConn>>,
    ) -> Result<Id, JobsError> {
        let mut table = self.table.lock().await;

        let existing = if job.unique_id.is_empty() {
            None
        } else {
            table.by_unique.get(&job.unique_id).copied()
        };

        if let Some(existing) = existing {
            let state = table
                .by_handle
                .get(&existing)
                .map(|entry| (entry.dispatched, entry.channels.clone()));
            match state {
                Some((false, _)) => {
                    if let Some(conn) = listening_conn {
                        if let Some(entry) = table.by_handle.get_mut(&existing) {
                            entry.client_conns.insert(conn.id(), Arc::clone(conn));
                        }
                    }
                    return Ok(existing);
                }
                Some((true, channels)) => match listening_conn {
                    None => return Ok(existing),
                    Some(conn) => {
                        let registered = match channels {
                            Some(channels) => {
                                channels
                                    .register_conn(Arc::clone(conn), ATTACH_DEADLINE)
                                    .await
                            }
                            None => false,
                        };
                        if registered {
                            return Ok(existing);
                        }
                        // the coordinator is gone or did not answer in time;
                        // start a fresh job under the same unique id
                    }
                },
                None => {}
            }
        }

        let mut entry = PendingJob::new(job.handle, job.unique_id.clone());
        if let Some(conn) = listening_conn {
            entry.client_conns.insert(conn.id(), Arc::clone(conn));
        }
        table.insert(entry);
        drop(table);

        if let Err(err) = self.queue.enqueue(job).await {
            let mut table = self.table.lock().await;
            table.remove(job.handle, &job.unique_id);
            return Err(err.into());
        }
        Ok(job.handle)
    }

    /// Pop the next job matching the worker's abilities and hand it to a
    /// fresh coordinator. The handoff (prune closed attachments, publish the
    /// coordinator channels, flip `dispatched`) happens under the table
    /// mutex; the coordinator task is spawned after it is released.
    pub async fn grab(
        &self,
        functions: &HashMap<String, Duration>,
    ) -> Result<Option<Job>, JobsError> {
        let names: Vec<String> = functions.keys().cloned().collect();
        let Some(job) = self.queue.dequeue(&names).await? else {
            return Ok(None);
        };

        let mut table = self.table.lock().await;
        let entry = table
            .by_handle
            .get_mut(&job.handle)
            .ok_or(JobsError::JobNotFound)?;
        let timeout = functions.get(&job.function).copied().unwrap_or(Duration::ZERO);

        entry.prune_closed();
        entry.dispatched = true;
        let conns = std::mem::take(&mut entry.client_conns);
        let (handles, coordinator) = Coordinator::install(job.handle, job.unique_id.clone(), conns);
        entry.channels = Some(handles);
        drop(table);

        self.active_coordinators.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(coordinator.run(
            timeout,
            Arc::clone(&self.table),
            Arc::clone(&self.active_coordinators),
        ));
        Ok(Some(job))
    }

    /// Status of the job identified by `handle` (preferred) or `unique_id`.
    /// Undispatched jobs answer from the table; dispatched ones from their
    /// coordinator, bounded by `deadline`.
    pub async fn get_status(
        &self,
        handle: Option<Id>,
        unique_id: &str,
        deadline: Duration,
    ) -> JobStatus {
        let mut table = self.table.lock().await;
        let resolved = match handle {
            Some(h) => table.by_handle.contains_key(&h).then_some(h),
            None => table.by_unique.get(unique_id).copied(),
        };
        let Some(resolved) = resolved else {
            return JobStatus::unknown(handle);
        };
        let Some(entry) = table.by_handle.get_mut(&resolved) else {
            return JobStatus::unknown(handle);
        };

        if !entry.dispatched {
            entry.prune_closed();
            return JobStatus {
                known: true,
                running: false,
                waiting_count: entry.client_conns.len(),
                handle,
                ..Default::default()
            };
        }

        let Some(channels) = entry.channels.clone() else {
            return JobStatus::unknown(handle);
        };
        drop(table);

        let status = tokio::time::timeout(deadline, async {
            let (reply_tx, reply_rx) = oneshot::channel();
            channels.status_query.send(reply_tx).await.ok()?;
            reply_rx.await.ok()
        })
        .await;
        match status {
            Ok(Some(status)) => status,
            _ => JobStatus::unknown(handle),
        }
    }

    /// Offer a worker packet to the job's coordinator. `true` iff the offer
    /// was accepted before the coordinator exited or `deadline` fired.
    pub async fn update_status(&self, handle: Id, msg: Message, deadline: Duration) -> bool {
        let channels = {
            let table = self.table.lock().await;
            table
                .by_handle
                .get(&handle)
                .and_then(|entry| entry.channels.clone())
        };
        let Some(channels) = channels else {
            return false;
        };
        matches!(
            tokio::time::timeout(deadline, channels.status_update.send(msg)).await,
            Ok(Ok(()))
        )
    }

    /// Number of live coordinator tasks.
    pub fn active_coordinator_count(&self) -> i32 {
        self.active_coordinators.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn table(&self) -> Arc<Mutex<JobTable>> {
        Arc::clone(&self.table)
    }

    #[cfg(test)]
    pub(crate) async fn coordinator_conns(&self, handle: Id) -> Option<Vec<Id>> {
        let channels = {
            let table = self.table.lock().await;
            table
                .by_handle
                .get(&handle)
                .and_then(|entry| entry.channels.clone())
        }?;
        let (reply_tx, reply_rx) = oneshot::channel();
        channels.conns_query.send(reply_tx).await.ok()?;
        reply_rx.await.ok()
    }
}
