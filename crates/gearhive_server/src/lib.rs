//! Gearman protocol job broker.
//!
//! Clients submit functions-with-payloads as jobs, workers declare abilities
//! and pull jobs, the broker routes results back to waiting clients. Pending
//! work is persisted in a SQL-backed queue; duplicate submissions with the
//! same unique id coalesce onto one pending job.
//!
//! The moving parts, bottom up:
//!
//! - [`conn`] / [`registry`]: per-connection state and the process-wide
//!   connection map.
//! - [`abilities`] / [`sleep`]: what each worker can run, and which workers
//!   are idle and waiting for a NOOP wake-up.
//! - [`queue`] / [`sql_queue`]: the persistent priority queue.
//! - [`pending_job`]: the in-memory record per live job and the coordinator
//!   task that owns it once dispatched.
//! - [`jobs`]: submit/grab/status orchestration across queue, table and
//!   coordinators.
//! - [`handlers`] / [`server`]: packet dispatch and the accept/serve loop.

pub mod abilities;
pub mod admin;
pub mod config;
pub mod conn;
pub mod error;
pub mod handlers;
pub mod job;
pub mod jobs;
pub(crate) mod pending_job;
pub mod queue;
pub mod registry;
pub mod server;
pub mod sleep;
pub mod sql_queue;

pub use config::Config;
pub use jobs::{JobStatus, JobsManager};
pub use server::Server;
