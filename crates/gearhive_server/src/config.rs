//! Broker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Queue backend selector for the SQL-backed queue.
pub const QUEUE_SQL: &str = "sql";

/// SQL driver selector for SQLite.
pub const QUEUE_SQLITE_DRIVER: &str = "sqlite";

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the broker listens on.
    pub bind_addr: String,
    pub log_file: PathBuf,
    pub log_stderr: bool,
    pub verbose: bool,
    pub queue_type: String,
    pub queue_driver: String,
    pub queue_datasource: String,
    pub queue_table: String,
    /// Deadline applied to per-request waits (status queries and updates).
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4730".to_string(),
            log_file: PathBuf::from("gearhived.log"),
            log_stderr: true,
            verbose: false,
            queue_type: QUEUE_SQL.to_string(),
            queue_driver: QUEUE_SQLITE_DRIVER.to_string(),
            queue_datasource: "gearhived.db".to_string(),
            queue_table: "queue".to_string(),
            request_timeout: Duration::from_secs(1),
        }
    }
}
