use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State as AxumState,
    routing::get,
};
use std::sync::Arc;
use uuid::Uuid;

use super::types::{SystemStats, Worker};
use crate::api::{ApiError, TaskServer, TaskService};
use crate::tasks::{
    engine::ContainerEngine,
    types::{Task, TaskEvent},
};

#[async_trait]
impl<E: ContainerEngine + 'static> TaskService for Worker<E> {
    async fn submit(&self, event: TaskEvent) -> Result<Task, ApiError> {
        Ok(self.submit_event(event).await?)
    }

    async fn stop(&self, task_id: Uuid) -> Result<TaskEvent, ApiError> {
        Ok(self.request_stop(task_id).await?)
    }

    async fn tasks(&self) -> Vec<Task> {
        self.get_tasks().await
    }
}

async fn get_stats<E: ContainerEngine + 'static>(
    AxumState(worker): AxumState<Arc<Worker<E>>>,
) -> Result<Json<SystemStats>, ApiError> {
    worker
        .latest_stats()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::Unavailable("stats have not been collected yet".to_string()))
}

/// Task routes plus `GET /stats`.
pub fn worker_server<E: ContainerEngine + 'static>(
    worker: Arc<Worker<E>>,
    address: &str,
    port: u16,
) -> TaskServer {
    let stats = Router::new()
        .route("/stats", get(get_stats::<E>))
        .with_state(worker.clone());
    TaskServer::new(worker, address, port).merge(stats)
}
