//! Job queue interface.

use crate::job::Job;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt queue row: {0}")]
    Corrupt(String),
}

/// Priority-ordered store of submitted jobs keyed by function.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Durably append a job.
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;

    /// Atomically remove and return the highest-priority job whose function
    /// is in `functions`; `None` if there is no match.
    async fn dequeue(&self, functions: &[String]) -> Result<Option<Job>, QueueError>;

    async fn size(&self) -> Result<u64, QueueError>;

    /// Release underlying resources.
    async fn dispose(&self) -> Result<(), QueueError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// In-memory queue double: records every enqueue and serves scripted
    /// jobs to dequeue in order.
    #[derive(Default)]
    pub(crate) struct MockQueue {
        inner: Mutex<MockQueueInner>,
    }

    #[derive(Default)]
    struct MockQueueInner {
        enqueued: Vec<Job>,
        scripted: VecDeque<Job>,
    }

    impl MockQueue {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Queue a job for the next matching dequeue.
        pub fn script(&self, job: Job) {
            self.inner.lock().unwrap().scripted.push_back(job);
        }

        pub fn enqueued(&self) -> Vec<Job> {
            self.inner.lock().unwrap().enqueued.clone()
        }
    }

    #[async_trait]
    impl Queue for MockQueue {
        async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
            self.inner.lock().unwrap().enqueued.push(job.clone());
            Ok(())
        }

        async fn dequeue(&self, functions: &[String]) -> Result<Option<Job>, QueueError> {
            let mut inner = self.inner.lock().unwrap();
            let position = inner
                .scripted
                .iter()
                .position(|job| functions.contains(&job.function));
            Ok(position.and_then(|idx| inner.scripted.remove(idx)))
        }

        async fn size(&self) -> Result<u64, QueueError> {
            Ok(self.inner.lock().unwrap().scripted.len() as u64)
        }

        async fn dispose(&self) -> Result<(), QueueError> {
            Ok(())
        }
    }
}
