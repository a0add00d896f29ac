//! Job model.

use gearhive_protocol::Id;

/// Queue priority. Lower value dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High = 0,
    Mid = 1,
    Low = 2,
}

impl Priority {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Priority::High),
            1 => Some(Priority::Mid),
            2 => Some(Priority::Low),
            _ => None,
        }
    }
}

/// A job as received from a client and stored in the queue. Immutable after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub function: String,
    pub data: String,
    /// Server-assigned identity.
    pub handle: Id,
    /// Client-supplied identity used for coalescing; empty means none.
    pub unique_id: String,
    pub priority: Priority,
    /// Reduce function name; empty unless a reduce submit.
    pub reducer: String,
}
