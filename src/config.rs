use std::time::Duration;

use crate::scheduler::SchedulerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EngineKind {
    /// The local Docker daemon.
    #[default]
    Docker,
    /// Containers that only exist in this process.
    Memory,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub engine: EngineKind,
    pub pull_timeout: Duration,
    pub log_timeout: Duration,
    pub stats_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub address: String,
    pub port: u16,
    /// `host:port` of every worker API.
    pub workers: Vec<String>,
    pub scheduler: SchedulerKind,
    pub send_interval: Duration,
    pub update_interval: Duration,
}
