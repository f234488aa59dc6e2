use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::task::{CreateTask, Task, TaskStatus};
use serde::Deserialize;
use services::services::task_lifecycle::{TaskLifecycleError, TaskLifecycleService};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

#[derive(Debug, Deserialize, TS)]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
}

pub async fn create_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreateTask>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = TaskLifecycleService::create_task(&state.db.pool, &user_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Task>>>, ApiError> {
    let tasks = match query.status {
        Some(status) => Task::find_by_status(&state.db.pool, status).await?,
        None => Task::find_all(&state.db.pool).await?,
    };
    Ok(ResponseJson(ApiResponse::success(tasks)))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = Task::find_by_id(&state.db.pool, task_id)
        .await?
        .ok_or(ApiError::Lifecycle(TaskLifecycleError::TaskNotFound(
            task_id,
        )))?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn accept_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = TaskLifecycleService::accept_task(&state.db.pool, &user_id, task_id).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn complete_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = TaskLifecycleService::complete_task(&state.db.pool, &user_id, task_id).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn approve_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = TaskLifecycleService::approve_task(&state.db.pool, &user_id, task_id).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = TaskLifecycleService::cancel_task(
        &state.db.pool,
        &user_id,
        task_id,
        state.cancellation_policy,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub fn router() -> Router<AppState> {
    let task_actions = Router::new()
        .route("/", get(get_task))
        .route("/accept", post(accept_task))
        .route("/complete", post(complete_task))
        .route("/approve", post(approve_task))
        .route("/cancel", post(cancel_task));

    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .nest("/tasks/{task_id}", task_actions)
}
