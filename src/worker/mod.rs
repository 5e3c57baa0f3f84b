pub mod api;
pub mod stats;
pub mod types;
pub mod worker;

pub use api::worker_server;
pub use stats::collect_stats;
pub use types::{SystemStats, Worker, WorkerError, WorkerResult};
pub use worker::run_tasks;
