use serde::{Deserialize, Serialize};

/// The manager's view of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// `host:port` of the worker API.
    pub api: String,
    /// Bytes the node may hand out; 0 when unknown.
    pub memory: i64,
    pub memory_allocated: i64,
    pub task_count: u64,
}

impl Node {
    pub fn new(api: &str) -> Self {
        Node {
            name: api.to_string(),
            api: api.to_string(),
            memory: 0,
            memory_allocated: 0,
            task_count: 0,
        }
    }

    pub fn fits(&self, memory: i64) -> bool {
        self.memory == 0 || self.memory - self.memory_allocated >= memory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SchedulerKind {
    #[default]
    RoundRobin,
    LeastLoaded,
}
