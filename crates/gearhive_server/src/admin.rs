//! Minimal admin text protocol.
//!
//! Lines arriving on a broker connection that do not start with `\0` are
//! admin commands. Only `version` is answered; everything else gets the
//! standard unknown-command error line.

use crate::conn::ServerConn;
use std::sync::Arc;
use tracing::debug;

const UNKNOWN_COMMAND: &str = "ERR unknown_command Unknown+server+command\n";

#[derive(Default)]
pub struct Admin;

impl Admin {
    pub fn new() -> Self {
        Self
    }

    pub async fn handle(&self, line: &str, conn: &Arc<ServerConn>) {
        let command = line.trim();
        let reply = match command {
            "version" => format!("OK {}\n", env!("CARGO_PKG_VERSION")),
            _ => UNKNOWN_COMMAND.to_string(),
        };
        if let Err(err) = conn.write_text(&reply).await {
            debug!(%conn, %err, "admin reply write failed");
        }
    }
}
