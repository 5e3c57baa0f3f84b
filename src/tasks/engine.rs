//! The narrow surface the runtime adapter drives on a container engine.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::types::Config;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("no such object: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rejected by engine: {0}")]
    Rejected(String),

    #[error("engine transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Resources and settings of a container, already in engine units.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub exposed_ports: Vec<String>,
    pub nano_cpus: i64,
    pub memory: i64,
    /// Passed through as given. Adapters refuse names their runtime binding
    /// cannot express.
    pub restart_policy: String,
    pub publish_all_ports: bool,
}

impl From<&Config> for ContainerSpec {
    fn from(config: &Config) -> Self {
        ContainerSpec {
            name: config.name.clone(),
            image: config.image.clone(),
            env: config.env.clone(),
            exposed_ports: config.exposed_ports.clone(),
            nano_cpus: config.nano_cpus(),
            memory: config.memory,
            restart_policy: config.restart_policy.clone(),
            publish_all_ports: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    pub remove_volumes: bool,
    pub remove_links: bool,
    pub force: bool,
}

impl RemoveOptions {
    /// Removal after a graceful stop.
    pub const TEARDOWN: RemoveOptions = RemoveOptions {
        remove_volumes: true,
        remove_links: false,
        force: false,
    };

    /// Removal of a container left behind by a failed run.
    pub const DISCARD: RemoveOptions = RemoveOptions {
        remove_volumes: true,
        remove_links: false,
        force: true,
    };
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Pulls `image`, reporting progress to the log as it arrives.
    async fn pull_image(&self, image: &str) -> Result<(), EngineError>;

    /// Creates the container and returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Copies the container's stdout/stderr written so far to our own.
    async fn copy_logs(&self, id: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, id: &str) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), EngineError>;
}
