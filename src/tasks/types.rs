use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::engine::EngineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[default]
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The orchestrable unit: the desired container plus its observed lifecycle.
///
/// Every field is optional on the wire so that clients may submit partial
/// snapshots; a missing `id` gets a fresh one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub id: Uuid,
    pub container_id: Option<String>,
    pub name: String,
    pub state: State,
    pub image: String,
    /// Fractional cores, `0.5` is half a core.
    pub cpu: f64,
    /// Bytes.
    pub memory: i64,
    /// Bytes.
    pub disk: i64,
    pub env: Vec<String>,
    pub exposed_ports: BTreeSet<String>,
    pub port_bindings: BTreeMap<String, String>,
    /// One of `""`, `"always"`, `"unless-stopped"`, `"on-failure"`.
    pub restart_policy: String,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
}

impl Default for Task {
    fn default() -> Self {
        Task {
            id: Uuid::new_v4(),
            container_id: None,
            name: String::new(),
            state: State::Pending,
            image: String::new(),
            cpu: 0.0,
            memory: 0,
            disk: 0,
            env: Vec::new(),
            exposed_ports: BTreeSet::new(),
            port_bindings: BTreeMap::new(),
            restart_policy: String::new(),
            start_time: None,
            finish_time: None,
        }
    }
}

impl Task {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Task {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }
}

/// An immutable request to move a task to `state`.
///
/// `task` is the requester's snapshot of the task. Events are appended to the
/// event log and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub state: State,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub task: Task,
}

impl TaskEvent {
    pub fn new(state: State, task: Task) -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state,
            timestamp: Utc::now(),
            task,
        }
    }

    /// Builds the stop request for a known task.
    pub fn stop(task: &Task) -> Self {
        let mut snapshot = task.clone();
        snapshot.state = State::Completed;
        TaskEvent::new(State::Completed, snapshot)
    }

    pub fn task_id(&self) -> Uuid {
        self.task.id
    }
}

/// The runtime-facing projection of a [`Task`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Name of the task, also used as the container name.
    pub name: String,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    pub env: Vec<String>,
    pub exposed_ports: Vec<String>,
    pub restart_policy: String,
}

impl From<&Task> for Config {
    fn from(task: &Task) -> Self {
        Config {
            name: task.name.clone(),
            image: task.image.clone(),
            cpu: task.cpu,
            memory: task.memory,
            disk: task.disk,
            env: task.env.clone(),
            exposed_ports: task.exposed_ports.iter().cloned().collect(),
            restart_policy: task.restart_policy.clone(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), DockerError> {
        if self.image.trim().is_empty() {
            return Err(DockerError::InvalidConfig("image must not be empty".to_string()));
        }
        if !self.cpu.is_finite() || self.cpu < 0.0 {
            return Err(DockerError::InvalidConfig(format!(
                "cpu must be a non-negative number, got {}",
                self.cpu
            )));
        }
        if self.memory < 0 {
            return Err(DockerError::InvalidConfig(format!(
                "memory must not be negative, got {}",
                self.memory
            )));
        }
        Ok(())
    }

    /// CPU share in the engine's nano-CPU unit, truncated.
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu * 1_000_000_000.0) as i64
    }
}

/// Runtime adapter bound to one container engine.
///
/// Built once per worker; the engine carries whatever credentials and socket
/// it discovered when it was constructed.
#[derive(Debug, Clone)]
pub struct DockerClient<E> {
    pub engine: E,
    pub pull_timeout: Duration,
    pub log_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Start => f.write_str("start"),
            Action::Stop => f.write_str("stop"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerOutcome {
    pub action: Action,
    pub container_id: Option<String>,
    pub result: String,
}

impl DockerOutcome {
    pub fn started(container_id: String) -> Self {
        DockerOutcome {
            action: Action::Start,
            container_id: Some(container_id),
            result: "success".to_string(),
        }
    }

    pub fn stopped() -> Self {
        DockerOutcome {
            action: Action::Stop,
            container_id: None,
            result: "success".to_string(),
        }
    }
}

/// A failed run or stop, tagged with the step that failed.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("invalid container config: {0}")]
    InvalidConfig(String),

    #[error("failed to pull image {image}")]
    Pull {
        image: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to create container {name}")]
    Create {
        name: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to start container {container_id}")]
    Start {
        container_id: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to copy logs of container {container_id}")]
    Logs {
        container_id: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to stop container {container_id}")]
    Stop {
        container_id: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to remove container {container_id}")]
    Remove {
        container_id: String,
        #[source]
        source: EngineError,
    },
}

impl DockerError {
    pub fn action(&self) -> Action {
        match self {
            DockerError::Stop { .. } | DockerError::Remove { .. } => Action::Stop,
            _ => Action::Start,
        }
    }

    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            DockerError::InvalidConfig(_) => None,
            DockerError::Pull { source, .. }
            | DockerError::Create { source, .. }
            | DockerError::Start { source, .. }
            | DockerError::Logs { source, .. }
            | DockerError::Stop { source, .. }
            | DockerError::Remove { source, .. } => Some(source),
        }
    }

    /// True when the engine reported the container (or image) as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self.engine_error(), Some(EngineError::NotFound(_)))
    }
}

pub type DockerResult = Result<DockerOutcome, DockerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_task() -> Task {
        let mut task = Task::new("web-1", "demo:latest");
        task.cpu = 0.5;
        task.memory = 104_857_600;
        task.env = vec!["MODE=test".to_string()];
        task.exposed_ports = ["8080/tcp".to_string(), "80/tcp".to_string()].into();
        task.restart_policy = "on-failure".to_string();
        task
    }

    #[test]
    fn config_projection_is_deterministic() {
        let task = sample_task();

        let first = Config::from(&task);
        let second = Config::from(&task);

        assert_eq!(first, second);
        assert_eq!(first.exposed_ports, vec!["80/tcp", "8080/tcp"]);
        assert_eq!(first.name, "web-1");
        assert_eq!(first.restart_policy, "on-failure");
    }

    #[test]
    fn nano_cpus_truncates() {
        let mut config = Config::from(&sample_task());
        assert_eq!(config.nano_cpus(), 500_000_000);

        config.cpu = 0.333_333_333_9;
        assert_eq!(config.nano_cpus(), 333_333_333);
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        let good = Config::from(&sample_task());
        assert!(good.validate().is_ok());

        let no_image = Config { image: "  ".to_string(), ..good.clone() };
        assert!(matches!(no_image.validate(), Err(DockerError::InvalidConfig(_))));

        let negative_cpu = Config { cpu: -1.0, ..good.clone() };
        assert!(matches!(negative_cpu.validate(), Err(DockerError::InvalidConfig(_))));

        let negative_memory = Config { memory: -1, ..good };
        assert!(matches!(negative_memory.validate(), Err(DockerError::InvalidConfig(_))));
    }

    #[test]
    fn partial_event_decodes_with_defaults() {
        let id = Uuid::new_v4();
        let event: TaskEvent = serde_json::from_value(json!({
            "state": "Scheduled",
            "task": { "id": id, "image": "demo:latest", "cpu": 0.5, "memory": 104857600 }
        }))
        .expect("decode");

        assert_eq!(event.state, State::Scheduled);
        assert_eq!(event.task.id, id);
        assert_eq!(event.task.state, State::Pending);
        assert_eq!(event.task.container_id, None);
        assert_eq!(event.task.memory, 104_857_600);
        assert!(event.task.exposed_ports.is_empty());
    }

    #[test]
    fn task_serializes_camel_case() {
        let mut task = sample_task();
        task.container_id = Some("abc".to_string());

        let value = serde_json::to_value(&task).expect("encode");

        assert_eq!(value["containerId"], "abc");
        assert_eq!(value["restartPolicy"], "on-failure");
        assert_eq!(value["state"], "Pending");
        assert!(value.get("exposedPorts").is_some());
    }

    #[test]
    fn stop_event_targets_completed() {
        let task = sample_task();
        let event = TaskEvent::stop(&task);

        assert_eq!(event.state, State::Completed);
        assert_eq!(event.task.state, State::Completed);
        assert_eq!(event.task_id(), task.id);
        assert_ne!(event.id, task.id);
    }

    #[test]
    fn not_found_is_detected_through_the_step() {
        let err = DockerError::Stop {
            container_id: "gone".to_string(),
            source: EngineError::NotFound("gone".to_string()),
        };
        assert!(err.is_not_found());
        assert_eq!(err.action(), Action::Stop);

        let err = DockerError::Pull {
            image: "demo".to_string(),
            source: EngineError::Transport("reset".to_string()),
        };
        assert!(!err.is_not_found());
        assert_eq!(err.action(), Action::Start);
    }
}
