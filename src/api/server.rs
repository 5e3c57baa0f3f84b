use axum::{
    Json, Router,
    extract::{Path, State as AxumState, rejection::JsonRejection},
    http::StatusCode,
    routing::{delete, get},
};
use std::{future::Future, io, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use super::types::{ApiError, TaskServer, TaskService};
use crate::tasks::types::{Task, TaskEvent};

/// `POST /tasks`, `GET /tasks` and `DELETE /tasks/{task_id}` bound to `service`.
pub fn task_routes<S: TaskService>(service: Arc<S>) -> Router {
    Router::new()
        .route("/tasks", get(get_tasks::<S>).post(start_task::<S>))
        .route("/tasks/{task_id}", delete(stop_task::<S>))
        .with_state(service)
}

async fn get_tasks<S: TaskService>(AxumState(service): AxumState<Arc<S>>) -> Json<Vec<Task>> {
    Json(service.tasks().await)
}

async fn start_task<S: TaskService>(
    AxumState(service): AxumState<Arc<S>>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(task_event) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "rejecting undecodable task event");
        ApiError::Decode(rejection.body_text())
    })?;

    let event_id = task_event.id;
    let task = service.submit(task_event).await?;
    info!(task_id = %task.id, event_id = %event_id, "added task event");
    Ok(Json(task))
}

async fn stop_task<S: TaskService>(
    AxumState(service): AxumState<Arc<S>>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let task_id = Uuid::parse_str(&task_id).map_err(|_| ApiError::InvalidTaskId(task_id))?;
    let event = service.stop(task_id).await?;
    info!(task_id = %task_id, event_id = %event.id, "added task event to stop task");
    Ok(StatusCode::NO_CONTENT)
}

impl TaskServer {
    pub fn new<S: TaskService>(service: Arc<S>, address: &str, port: u16) -> Self {
        Self {
            address: address.to_string(),
            port,
            router: task_routes(service),
        }
    }

    /// Adds routes beside the task routes.
    pub fn merge(mut self, routes: Router) -> Self {
        self.router = self.router.merge(routes);
        self
    }

    pub fn router(&self) -> Router {
        self.router.clone().layer(TraceLayer::new_for_http())
    }

    pub async fn start_server(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> io::Result<()> {
        let listener = TcpListener::bind((self.address.as_str(), self.port)).await?;
        info!(address = %listener.local_addr()?, "listening");
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> io::Result<()> {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}
