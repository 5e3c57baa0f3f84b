use async_trait::async_trait;
use axum::{Json, Router, extract::State as AxumState, routing::get};
use std::sync::Arc;
use uuid::Uuid;

use super::types::Manager;
use crate::api::{ApiError, TaskServer, TaskService};
use crate::scheduler::Node;
use crate::tasks::types::{Task, TaskEvent};

#[async_trait]
impl TaskService for Manager {
    async fn submit(&self, event: TaskEvent) -> Result<Task, ApiError> {
        Ok(self.add_task(event).await?)
    }

    async fn stop(&self, task_id: Uuid) -> Result<TaskEvent, ApiError> {
        Ok(self.request_stop(task_id).await?)
    }

    async fn tasks(&self) -> Vec<Task> {
        self.get_tasks().await
    }
}

async fn get_workers(AxumState(manager): AxumState<Arc<Manager>>) -> Json<Vec<Node>> {
    Json(manager.nodes().await)
}

/// Task routes plus `GET /workers`.
pub fn manager_server(manager: Arc<Manager>, address: &str, port: u16) -> TaskServer {
    let workers = Router::new()
        .route("/workers", get(get_workers))
        .with_state(manager.clone());
    TaskServer::new(manager, address, port).merge(workers)
}
