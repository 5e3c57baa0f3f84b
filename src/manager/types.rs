use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::api::ApiError;
use crate::error_chain;
use crate::scheduler::Scheduler;
use crate::tasks::store::{EventLog, EventQueue, TaskDb};
use crate::tasks::types::State;
use std::collections::HashMap;
use thiserror::Error;

/// Control plane: queues events, places tasks on workers and mirrors what
/// the workers report.
///
/// Workers own the authoritative task records; `task_db` here is a copy
/// refreshed by [`Manager::update_tasks`].
pub struct Manager {
    pub(crate) pending: Mutex<EventQueue>,
    pub task_db: TaskDb,
    pub event_db: EventLog,
    pub workers: Vec<String>,
    pub(crate) placement: RwLock<Placement>,
    /// Targets a worker accepted that `task_db` has not caught up with yet.
    pub(crate) accepted: RwLock<HashMap<Uuid, State>>,
    /// Memory in bytes reported by each worker's `/stats`.
    pub(crate) capacity: RwLock<HashMap<String, i64>>,
    pub(crate) scheduler: Mutex<Box<dyn Scheduler>>,
    pub(crate) client: reqwest::Client,
}

/// Which worker owns which live task. Finished tasks are released.
#[derive(Debug, Default)]
pub(crate) struct Placement {
    pub worker_task_map: HashMap<String, Vec<Uuid>>,
    pub task_worker_map: HashMap<Uuid, String>,
}

impl Placement {
    pub fn assign(&mut self, task_id: Uuid, worker: &str) {
        self.worker_task_map
            .entry(worker.to_string())
            .or_default()
            .push(task_id);
        self.task_worker_map.insert(task_id, worker.to_string());
    }

    pub fn release(&mut self, task_id: &Uuid) -> Option<String> {
        let worker = self.task_worker_map.remove(task_id)?;
        if let Some(task_ids) = self.worker_task_map.get_mut(&worker) {
            task_ids.retain(|id| id != task_id);
        }
        Some(worker)
    }
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no workers are available to handle tasks")]
    NoWorkersAvailable,

    #[error("no pending task events")]
    NoTasksInQueue,

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidStateTransition { task_id: Uuid, from: State, to: State },

    #[error("no task with id {0}")]
    TaskNotFound(Uuid),

    #[error("task {0} has already finished")]
    TaskFinished(Uuid),

    #[error("worker {worker} communication failed")]
    WorkerCommunication {
        worker: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("worker {worker} rejected the request with {status}: {message}")]
    WorkerRejected {
        worker: String,
        status: u16,
        message: String,
    },
}

impl From<ManagerError> for ApiError {
    fn from(manager_error: ManagerError) -> Self {
        match manager_error {
            ManagerError::InvalidStateTransition { task_id, from, to } => {
                ApiError::InvalidTransition { task_id, from, to }
            }
            ManagerError::TaskNotFound(task_id) => ApiError::NotFound(task_id),
            ManagerError::NoWorkersAvailable => {
                ApiError::Unavailable(ManagerError::NoWorkersAvailable.to_string())
            }
            other => ApiError::Internal(error_chain(&other)),
        }
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;
