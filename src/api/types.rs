use async_trait::async_trait;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::tasks::types::{State, Task, TaskEvent};

/// Operations behind the `/tasks` routes, served by workers and the manager
/// alike.
#[async_trait]
pub trait TaskService: Send + Sync + 'static {
    /// Logs the event and queues it. Returns the embedded task.
    async fn submit(&self, event: TaskEvent) -> Result<Task, ApiError>;

    /// Synthesizes, logs and queues a stop event for a known task.
    async fn stop(&self, task_id: Uuid) -> Result<TaskEvent, ApiError>;

    async fn tasks(&self) -> Vec<Task>;
}

/// Error body returned by every route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrResponse {
    pub http_status_code: u16,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("error unmarshalling body: {0}")]
    Decode(String),

    #[error("invalid task id {0:?}")]
    InvalidTaskId(String),

    #[error("no task with id {0} found")]
    NotFound(Uuid),

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition { task_id: Uuid, from: State, to: State },

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Decode(_) | ApiError::InvalidTaskId(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidTransition { .. } => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrResponse {
            http_status_code: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// HTTP front of a worker or manager.
pub struct TaskServer {
    pub address: String,
    pub port: u16,
    pub(crate) router: axum::Router,
}
