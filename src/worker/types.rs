use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

use crate::api::ApiError;
use crate::error_chain;
use crate::tasks::store::{EventLog, EventQueue, TaskDb};
use crate::tasks::types::{DockerClient, DockerError, State};

/// A node that runs tasks through one container engine.
///
/// HTTP handlers only log and enqueue events; [`run_tasks`] is the single
/// consumer of the queue and the only writer of `db`.
///
/// [`run_tasks`]: super::worker::run_tasks
pub struct Worker<E> {
    pub name: String,
    pub(crate) queue: Mutex<EventQueue>,
    pub(crate) queue_ready: Notify,
    pub db: TaskDb,
    pub events: EventLog,
    pub(crate) runtime: DockerClient<E>,
    pub(crate) stats: RwLock<Option<SystemStats>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    /// Percent, two decimals.
    pub cpu_usage: f32,
    pub total_memory_mb: u64,
    pub used_memory_mb: u64,
    pub total_swap_mb: u64,
    pub used_swap_mb: u64,
    pub system_name: String,
    pub hostname: String,
    pub total_cpus: u64,
    /// Percent of all disk space in use.
    pub disk_usage: f32,
    pub task_count: u64,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("no tasks in the queue")]
    NoTasksInQueue,

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidStateTransition { task_id: Uuid, from: State, to: State },

    #[error("no task with id {0}")]
    TaskNotFound(Uuid),

    #[error("task {0} has no container to stop")]
    MissingContainer(Uuid),

    #[error("runtime failure for task {task_id}")]
    Runtime {
        task_id: Uuid,
        #[source]
        source: DockerError,
    },
}

impl From<WorkerError> for ApiError {
    fn from(worker_error: WorkerError) -> Self {
        match worker_error {
            WorkerError::InvalidStateTransition { task_id, from, to } => {
                ApiError::InvalidTransition { task_id, from, to }
            }
            WorkerError::TaskNotFound(task_id) => ApiError::NotFound(task_id),
            other => ApiError::Internal(error_chain(&other)),
        }
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
