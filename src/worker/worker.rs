use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{Worker, WorkerError, WorkerResult};
use crate::error_chain;
use crate::tasks::{
    engine::ContainerEngine,
    state::valid_state_transition,
    store::{EventLog, EventQueue, TaskDb},
    types::{Config, DockerClient, State, Task, TaskEvent},
};

impl<E: ContainerEngine> Worker<E> {
    pub fn new(name: &str, runtime: DockerClient<E>) -> Self {
        Worker {
            name: name.to_string(),
            queue: Mutex::new(EventQueue::new()),
            queue_ready: Notify::new(),
            db: TaskDb::new(),
            events: EventLog::new(),
            runtime,
            stats: RwLock::new(None),
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Logs `event` and queues it for the drain loop.
    ///
    /// The target is checked against the task's projected state: the target
    /// of its newest queued event, else its stored state, else `Pending` for
    /// a task never seen. A refused event stays in the log.
    pub async fn submit_event(&self, event: TaskEvent) -> WorkerResult<Task> {
        self.events.append(event.clone()).await;

        let task_id = event.task_id();
        let mut queue = self.queue.lock().await;
        let current = match queue.target(&task_id) {
            Some(target) => target,
            None => self
                .db
                .get(&task_id)
                .await
                .map(|task| task.state)
                .unwrap_or_default(),
        };
        if !valid_state_transition(current, event.state) {
            warn!(
                task_id = %task_id,
                from = %current,
                to = %event.state,
                "rejecting task event"
            );
            return Err(WorkerError::InvalidStateTransition {
                task_id,
                from: current,
                to: event.state,
            });
        }

        let task = event.task.clone();
        queue.push_back(event);
        drop(queue);
        self.queue_ready.notify_one();
        Ok(task)
    }

    /// Builds the stop event for a known task and submits it.
    pub async fn request_stop(&self, task_id: Uuid) -> WorkerResult<TaskEvent> {
        let task = self
            .db
            .get(&task_id)
            .await
            .ok_or(WorkerError::TaskNotFound(task_id))?;

        let event = TaskEvent::stop(&task);
        self.submit_event(event.clone()).await?;
        Ok(event)
    }

    /// Applies the oldest queued event to the task table.
    pub async fn run_task(&self) -> WorkerResult<Task> {
        let event = self
            .queue
            .lock()
            .await
            .pop_front()
            .ok_or(WorkerError::NoTasksInQueue)?;
        let task_id = event.task_id();

        let applied = self.apply_event(event).await;
        self.queue.lock().await.settle(&task_id);
        applied
    }

    async fn apply_event(&self, event: TaskEvent) -> WorkerResult<Task> {
        let task_id = event.task_id();
        let current = match self.db.get(&task_id).await {
            Some(task) => task,
            None => Task {
                state: State::Pending,
                container_id: None,
                start_time: None,
                finish_time: None,
                ..event.task.clone()
            },
        };

        if !valid_state_transition(current.state, event.state) {
            warn!(
                task_id = %task_id,
                from = %current.state,
                to = %event.state,
                "invalid state transition"
            );
            return Err(WorkerError::InvalidStateTransition {
                task_id,
                from: current.state,
                to: event.state,
            });
        }

        if current.state == event.state {
            self.db.upsert(current.clone()).await;
            return Ok(current);
        }

        match event.state {
            State::Running => self.start_task(current).await,
            State::Completed => self.stop_task(current).await,
            target => {
                let mut task = current;
                task.state = target;
                if target == State::Failed {
                    task.finish_time = Some(Utc::now());
                }
                info!(task_id = %task_id, state = %target, "task state updated");
                self.db.upsert(task.clone()).await;
                Ok(task)
            }
        }
    }

    async fn start_task(&self, mut task: Task) -> WorkerResult<Task> {
        let config = Config::from(&task);

        match self.runtime.run(&config).await {
            Ok(outcome) => {
                task.container_id = outcome.container_id;
                task.state = State::Running;
                task.start_time = Some(Utc::now());
                info!(
                    task_id = %task.id,
                    container_id = task.container_id.as_deref().unwrap_or_default(),
                    "task started"
                );
                self.db.upsert(task.clone()).await;
                Ok(task)
            }
            Err(source) => {
                error!(task_id = %task.id, error = %error_chain(&source), "error running task");
                task.state = State::Failed;
                task.finish_time = Some(Utc::now());
                let task_id = task.id;
                self.db.upsert(task).await;
                Err(WorkerError::Runtime { task_id, source })
            }
        }
    }

    async fn stop_task(&self, mut task: Task) -> WorkerResult<Task> {
        let Some(container_id) = task.container_id.clone() else {
            return Err(WorkerError::MissingContainer(task.id));
        };

        match self.runtime.stop(&container_id).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                warn!(
                    task_id = %task.id,
                    container_id = %container_id,
                    "container already gone, treating task as stopped"
                );
            }
            Err(source) => {
                error!(task_id = %task.id, error = %error_chain(&source), "error stopping task");
                return Err(WorkerError::Runtime {
                    task_id: task.id,
                    source,
                });
            }
        }

        task.state = State::Completed;
        task.finish_time = Some(Utc::now());
        info!(task_id = %task.id, container_id = %container_id, "stopped and removed task");
        self.db.upsert(task.clone()).await;
        Ok(task)
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        self.db.list().await
    }

    pub async fn task_count(&self) -> usize {
        self.db.len().await
    }
}

/// Drains the worker's queue forever, sleeping while it is empty.
pub async fn run_tasks<E: ContainerEngine>(worker: Arc<Worker<E>>) {
    info!(worker = %worker.name, "task loop started");
    loop {
        match worker.run_task().await {
            Ok(task) => debug!(task_id = %task.id, state = %task.state, "task event applied"),
            Err(WorkerError::NoTasksInQueue) => worker.queue_ready.notified().await,
            Err(err) => error!(error = %error_chain(&err), "error running task"),
        }
    }
}
