pub mod server;
pub mod types;

pub use server::task_routes;
pub use types::{ApiError, ErrResponse, TaskServer, TaskService};
