//! Idle-worker tracking.

use gearhive_protocol::Id;
use std::collections::HashSet;
use std::sync::Mutex;

/// Workers that announced idleness via PRE_SLEEP. An entry is dropped as
/// soon as the worker sends any packet or its connection closes; while
/// present, the worker is a candidate for a NOOP wake-up on new work.
#[derive(Default)]
pub struct SleepSet {
    ids: Mutex<HashSet<Id>>,
}

impl SleepSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: Id) {
        self.lock().insert(id);
    }

    pub fn remove(&self, id: Id) {
        self.lock().remove(&id);
    }

    pub fn snapshot(&self) -> Vec<Id> {
        self.lock().iter().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<Id>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_snapshot() {
        let sleep = SleepSet::new();
        let a = Id::random();
        let b = Id::random();

        sleep.add(a);
        sleep.add(b);
        sleep.add(a);
        assert_eq!(sleep.snapshot().len(), 2);

        sleep.remove(a);
        assert_eq!(sleep.snapshot(), vec![b]);

        sleep.remove(a);
        assert_eq!(sleep.snapshot().len(), 1);
    }
}
