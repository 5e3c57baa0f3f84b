pub mod scheduler;
pub mod types;

pub use scheduler::{LeastLoaded, RoundRobin, Scheduler, new_scheduler, select_worker};
pub use types::{Node, SchedulerKind};
