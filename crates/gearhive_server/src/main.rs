//! gearhived - Gearman protocol broker daemon.
//!
//! Usage:
//!     gearhived --bind-addr 0.0.0.0:4730 --sql-queue-datasource gearhived.db

use clap::Parser;
use gearhive_logging::LogConfig;
use gearhive_server::config::{QUEUE_SQL, QUEUE_SQLITE_DRIVER};
use gearhive_server::{Config, Server};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "gearhived", about = "Gearman protocol job broker")]
struct Args {
    /// Address the broker should listen on
    #[arg(long, default_value = "0.0.0.0:4730")]
    bind_addr: String,

    /// Log file path
    #[arg(long, default_value = "gearhived.log")]
    log_file: PathBuf,

    /// Mirror logs on stderr
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    log_stderr: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Queue backend
    #[arg(long, default_value = QUEUE_SQL)]
    queue_type: String,

    /// SQL queue driver
    #[arg(long, default_value = QUEUE_SQLITE_DRIVER)]
    sql_queue_driver: String,

    /// SQL queue data source (path or sqlite: URL)
    #[arg(long, default_value = "gearhived.db")]
    sql_queue_datasource: String,

    /// Queue table name
    #[arg(long, default_value = "queue")]
    queue_table: String,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    request_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    gearhive_logging::init_logging(LogConfig {
        log_file: &args.log_file,
        stderr: args.log_stderr,
        verbose: args.verbose,
    })?;

    let config = Config {
        bind_addr: args.bind_addr,
        log_file: args.log_file,
        log_stderr: args.log_stderr,
        verbose: args.verbose,
        queue_type: args.queue_type,
        queue_driver: args.sql_queue_driver,
        queue_datasource: args.sql_queue_datasource,
        queue_table: args.queue_table,
        request_timeout: Duration::from_millis(args.request_timeout_ms),
    };

    tracing::info!("starting gearhived");
    tracing::info!("  bind: {}", config.bind_addr);
    tracing::info!("  queue: {} ({})", config.queue_type, config.queue_datasource);

    let server = Server::bind(config).await?;
    server.run().await
}
