use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{Manager, ManagerError, ManagerResult, Placement};
use crate::api::ErrResponse;
use crate::error_chain;
use crate::scheduler::{Node, Scheduler, select_worker};
use crate::tasks::{
    state::valid_state_transition,
    store::{EventLog, EventQueue, TaskDb},
    types::{State, Task, TaskEvent},
};
use crate::worker::SystemStats;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MIB: i64 = 1024 * 1024;

impl Manager {
    pub fn new(workers: Vec<String>, scheduler: Box<dyn Scheduler>) -> Self {
        Manager {
            pending: Mutex::new(EventQueue::new()),
            task_db: TaskDb::new(),
            event_db: EventLog::new(),
            workers,
            placement: RwLock::new(Placement::default()),
            accepted: RwLock::new(HashMap::new()),
            capacity: RwLock::new(HashMap::new()),
            scheduler: Mutex::new(scheduler),
            client: reqwest::Client::new(),
        }
    }

    /// Logs the event and queues it for [`Manager::send_work`].
    ///
    /// The target is checked against where the task is headed: its newest
    /// pending event, else the last target a worker accepted, else the
    /// mirrored state, else `Pending` for a new task.
    pub async fn add_task(&self, event: TaskEvent) -> ManagerResult<Task> {
        self.event_db.append(event.clone()).await;

        let task_id = event.task_id();
        let mut pending = self.pending.lock().await;
        let current = match pending.target(&task_id) {
            Some(target) => target,
            None => self.projected_state(&task_id).await,
        };
        if !valid_state_transition(current, event.state) {
            warn!(
                task_id = %task_id,
                from = %current,
                to = %event.state,
                "rejecting task event"
            );
            return Err(ManagerError::InvalidStateTransition {
                task_id,
                from: current,
                to: event.state,
            });
        }

        let task = event.task.clone();
        pending.push_back(event);
        Ok(task)
    }

    async fn projected_state(&self, task_id: &Uuid) -> State {
        if let Some(target) = self.accepted.read().await.get(task_id).copied() {
            return target;
        }
        self.task_db
            .get(task_id)
            .await
            .map(|task| task.state)
            .unwrap_or_default()
    }

    pub async fn request_stop(&self, task_id: Uuid) -> ManagerResult<TaskEvent> {
        let task = self
            .task_db
            .get(&task_id)
            .await
            .ok_or(ManagerError::TaskNotFound(task_id))?;

        let event = TaskEvent::stop(&task);
        self.add_task(event.clone()).await?;
        Ok(event)
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Scheduler view of every worker, counting non-terminal tasks only.
    pub async fn nodes(&self) -> Vec<Node> {
        let capacity = self.capacity.read().await.clone();
        let placement = self.placement.read().await;
        let mut nodes = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let mut node = Node::new(worker);
            node.memory = capacity.get(worker).copied().unwrap_or_default();
            for task_id in placement.worker_task_map.get(worker).into_iter().flatten() {
                if let Some(task) = self.task_db.get(task_id).await {
                    if !task.state.is_terminal() {
                        node.task_count += 1;
                        node.memory_allocated += task.memory;
                    }
                }
            }
            nodes.push(node);
        }
        nodes
    }

    pub async fn select_worker(&self, task: &Task) -> ManagerResult<String> {
        let nodes = self.nodes().await;
        let mut scheduler = self.scheduler.lock().await;
        select_worker(scheduler.as_mut(), task, &nodes)
            .map(|node| node.api)
            .ok_or(ManagerError::NoWorkersAvailable)
    }

    /// Forwards the oldest pending event to the worker owning its task,
    /// placing new tasks first. Returns the worker it went to.
    ///
    /// Events that could not be delivered go back to the front of the queue.
    /// Events a worker refused are dropped, and a task placed only for that
    /// event is forgotten again. Events for finished tasks are dropped.
    pub async fn send_work(&self) -> ManagerResult<String> {
        let event = self
            .pending
            .lock()
            .await
            .pop_front()
            .ok_or(ManagerError::NoTasksInQueue)?;
        let task_id = event.task_id();

        let assigned = self
            .placement
            .read()
            .await
            .task_worker_map
            .get(&task_id)
            .cloned();
        let (worker, newly_placed) = match assigned {
            Some(worker) => (worker, false),
            None => {
                if let Some(known) = self.task_db.get(&task_id).await {
                    if known.state.is_terminal() {
                        debug!(task_id = %task_id, state = %known.state, "dropping event for finished task");
                        self.pending.lock().await.settle(&task_id);
                        return Err(ManagerError::TaskFinished(task_id));
                    }
                }

                let worker = match self.select_worker(&event.task).await {
                    Ok(worker) => worker,
                    Err(err) => {
                        self.pending.lock().await.requeue(event);
                        return Err(err);
                    }
                };
                self.task_db
                    .upsert(Task {
                        state: State::Pending,
                        container_id: None,
                        start_time: None,
                        finish_time: None,
                        ..event.task.clone()
                    })
                    .await;
                self.placement.write().await.assign(task_id, &worker);
                info!(task_id = %task_id, worker = %worker, "placed task");
                (worker, true)
            }
        };

        match self.send_worker_event(&worker, &event).await {
            Ok(()) => {
                self.accepted.write().await.insert(task_id, event.state);
                self.pending.lock().await.settle(&task_id);
                info!(task_id = %task_id, event_id = %event.id, worker = %worker, "event sent");
                Ok(worker)
            }
            Err(err @ ManagerError::WorkerRejected { .. }) => {
                warn!(task_id = %task_id, error = %err, "worker refused event");
                if newly_placed {
                    self.placement.write().await.release(&task_id);
                    self.task_db.remove(&task_id).await;
                }
                self.pending.lock().await.settle(&task_id);
                Err(err)
            }
            Err(err) => {
                self.pending.lock().await.requeue(event);
                Err(err)
            }
        }
    }

    async fn send_worker_event(&self, worker: &str, task_event: &TaskEvent) -> ManagerResult<()> {
        let url = format!("http://{worker}/tasks");
        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(task_event)
            .send()
            .await
            .map_err(|source| ManagerError::WorkerCommunication {
                worker: worker.to_string(),
                source,
            })?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status().as_u16();
        let message = match response.json::<ErrResponse>().await {
            Ok(body) => body.message,
            Err(_) => "no error body".to_string(),
        };
        Err(ManagerError::WorkerRejected {
            worker: worker.to_string(),
            status,
            message,
        })
    }

    async fn get_from_worker<T: DeserializeOwned>(&self, worker: &str, path: &str) -> ManagerResult<T> {
        let url = format!("http://{worker}{path}");
        let communication = |source| ManagerError::WorkerCommunication {
            worker: worker.to_string(),
            source,
        };

        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(communication)?;
        if !response.status().is_success() {
            return Err(ManagerError::WorkerRejected {
                worker: worker.to_string(),
                status: response.status().as_u16(),
                message: format!("GET {path} failed"),
            });
        }
        response.json().await.map_err(communication)
    }

    /// Copies state, container id and timestamps reported by every worker
    /// into `task_db`. Returns how many tasks changed.
    ///
    /// An unreachable worker is logged and skipped.
    pub async fn update_tasks(&self) -> usize {
        let mut updated = 0;
        for worker in &self.workers {
            let tasks: Vec<Task> = match self.get_from_worker(worker, "/tasks").await {
                Ok(tasks) => tasks,
                Err(err) => {
                    warn!(worker = %worker, error = %error_chain(&err), "could not fetch tasks");
                    continue;
                }
            };

            for reported in tasks {
                let Some(mut local) = self.task_db.get(&reported.id).await else {
                    debug!(task_id = %reported.id, worker = %worker, "ignoring unknown task");
                    continue;
                };
                self.observe(&reported).await;
                if local.state == reported.state && local.container_id == reported.container_id {
                    continue;
                }

                info!(
                    task_id = %reported.id,
                    from = %local.state,
                    to = %reported.state,
                    "updating task"
                );
                local.state = reported.state;
                local.container_id = reported.container_id;
                local.start_time = reported.start_time;
                local.finish_time = reported.finish_time;
                self.task_db.upsert(local).await;
                updated += 1;
            }
        }
        updated
    }

    /// Forgets an accepted target once the worker reached it or can no longer
    /// reach it, and releases the placement of finished tasks.
    async fn observe(&self, reported: &Task) {
        {
            let mut accepted = self.accepted.write().await;
            if let Some(target) = accepted.get(&reported.id).copied() {
                if reported.state == target || !valid_state_transition(reported.state, target) {
                    accepted.remove(&reported.id);
                }
            }
        }
        if reported.state.is_terminal() {
            if let Some(worker) = self.placement.write().await.release(&reported.id) {
                debug!(task_id = %reported.id, worker = %worker, "released finished task");
            }
        }
    }

    /// Reads each worker's memory from its `/stats`. Returns how many workers
    /// answered; workers that have not sampled yet keep an unknown capacity.
    pub async fn update_nodes(&self) -> usize {
        let mut answered = 0;
        for worker in &self.workers {
            match self.get_from_worker::<SystemStats>(worker, "/stats").await {
                Ok(stats) => {
                    let memory = i64::try_from(stats.total_memory_mb)
                        .unwrap_or(i64::MAX)
                        .saturating_mul(MIB);
                    self.capacity.write().await.insert(worker.clone(), memory);
                    answered += 1;
                }
                Err(err) => {
                    debug!(worker = %worker, error = %error_chain(&err), "no stats from worker");
                }
            }
        }
        answered
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        self.task_db.list().await
    }
}

/// Sends every pending event each `interval`.
///
/// Dropped events do not hold up the rest of the queue; an undeliverable one
/// was requeued and waits for the next round.
pub async fn process_tasks(manager: Arc<Manager>, interval: Duration) {
    loop {
        loop {
            match manager.send_work().await {
                Ok(_) => {}
                Err(ManagerError::NoTasksInQueue) => break,
                Err(ManagerError::WorkerRejected { .. } | ManagerError::TaskFinished(_)) => {}
                Err(err) => {
                    error!(error = %error_chain(&err), "error sending work");
                    break;
                }
            }
        }
        tokio::time::sleep(interval).await;
    }
}

/// Refreshes worker capacity and the mirrored task table each `interval`.
pub async fn sync_tasks(manager: Arc<Manager>, interval: Duration) {
    loop {
        let answered = manager.update_nodes().await;
        let updated = manager.update_tasks().await;
        debug!(answered, updated, "task sync finished");
        tokio::time::sleep(interval).await;
    }
}
