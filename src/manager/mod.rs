pub mod api;
pub mod manager;
pub mod types;

pub use api::manager_server;
pub use manager::{process_tasks, sync_tasks};
pub use types::{Manager, ManagerError, ManagerResult};
