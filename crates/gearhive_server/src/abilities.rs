//! Per-worker ability set.

use std::collections::HashMap;
use std::time::Duration;

/// The functions a worker has declared it can execute, each with an optional
/// execution timeout (zero means none).
#[derive(Debug, Default, Clone)]
pub struct Abilities {
    functions: HashMap<String, Duration>,
}

impl Abilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a function. Re-declaring overwrites the stored timeout.
    pub fn can_do(&mut self, function: &str, timeout: Duration) {
        self.functions.insert(function.to_string(), timeout);
    }

    pub fn cant_do(&mut self, function: &str) {
        self.functions.remove(function);
    }

    pub fn reset(&mut self) {
        self.functions.clear();
    }

    pub fn supports(&self, function: &str) -> bool {
        self.functions.contains_key(function)
    }

    pub fn timeout_for(&self, function: &str) -> Duration {
        self.functions.get(function).copied().unwrap_or(Duration::ZERO)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, Duration> {
        self.functions.clone()
    }
}
