//! Process-wide connection registry.

use crate::conn::ServerConn;
use gearhive_protocol::Id;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct ConnRegistry {
    conns: Mutex<HashMap<Id, Arc<ServerConn>>>,
}

impl ConnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, conn: Arc<ServerConn>) {
        self.lock().insert(conn.id(), conn);
    }

    /// Look up a connection by id; `None` if it is not registered.
    pub fn get(&self, id: Id) -> Option<Arc<ServerConn>> {
        self.lock().get(&id).cloned()
    }

    pub fn remove(&self, id: Id) {
        self.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Id, Arc<ServerConn>>> {
        self.conns.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
