use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{State, Task, TaskEvent};

/// Task table keyed by task id. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct TaskDb {
    tasks: Arc<RwLock<HashMap<Uuid, Task>>>,
}

impl TaskDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &Uuid) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &Uuid) -> bool {
        self.tasks.read().await.contains_key(id)
    }

    pub async fn upsert(&self, task: Task) {
        self.tasks.write().await.insert(task.id, task);
    }

    pub async fn remove(&self, id: &Uuid) -> Option<Task> {
        self.tasks.write().await.remove(id)
    }

    /// Snapshot of every task, oldest start first, unstarted last.
    pub async fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| match (a.start_time, b.start_time) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.name.cmp(&b.name).then(a.id.cmp(&b.id)),
        });
        tasks
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

/// Append-only log of every submitted event, keyed by task id.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<RwLock<HashMap<Uuid, Vec<TaskEvent>>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, event: TaskEvent) {
        self.events
            .write()
            .await
            .entry(event.task_id())
            .or_default()
            .push(event);
    }

    /// Events for one task in submission order.
    pub async fn events_for(&self, task_id: &Uuid) -> Vec<TaskEvent> {
        self.events
            .read()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn latest(&self, task_id: &Uuid) -> Option<TaskEvent> {
        self.events
            .read()
            .await
            .get(task_id)
            .and_then(|events| events.last().cloned())
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// FIFO of accepted events.
///
/// Per task it also remembers the target of the newest event that was
/// accepted but not yet settled, so the next submission can be checked
/// against where the task is headed instead of where it was last stored.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<TaskEvent>,
    unsettled: HashMap<Uuid, Unsettled>,
}

#[derive(Debug, Clone, Copy)]
struct Unsettled {
    target: State,
    count: usize,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, event: TaskEvent) {
        let entry = self.unsettled.entry(event.task_id()).or_insert(Unsettled {
            target: event.state,
            count: 0,
        });
        entry.target = event.state;
        entry.count += 1;
        self.events.push_back(event);
    }

    /// The oldest event. It stays unsettled until [`EventQueue::settle`].
    pub fn pop_front(&mut self) -> Option<TaskEvent> {
        self.events.pop_front()
    }

    /// Puts a popped, unsettled event back at the head.
    pub fn requeue(&mut self, event: TaskEvent) {
        self.events.push_front(event);
    }

    /// Marks one popped event for `task_id` as handled, whatever the outcome.
    pub fn settle(&mut self, task_id: &Uuid) {
        if let Some(entry) = self.unsettled.get_mut(task_id) {
            entry.count = entry.count.saturating_sub(1);
            if entry.count == 0 {
                self.unsettled.remove(task_id);
            }
        }
    }

    /// Target of the newest unsettled event for `task_id`.
    pub fn target(&self, task_id: &Uuid) -> Option<State> {
        self.unsettled.get(task_id).map(|entry| entry.target)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
