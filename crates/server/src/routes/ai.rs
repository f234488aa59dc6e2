use std::sync::Arc;

use axum::{Json, Router, extract::State, response::Json as ResponseJson, routing::post};
use serde::Deserialize;
use services::services::{
    billing::{AiBillingService, CodeExplanation, FixSuggestion, GeneratedStory, GeneratedTests},
    ledger::CreditLedger,
};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, auth::AuthUser, error::ApiError};

#[derive(Debug, Deserialize, TS)]
pub struct ExplainRequest {
    pub code: String,
}

#[derive(Debug, Deserialize, TS)]
pub struct FixRequest {
    pub code: String,
    pub error_message: String,
}

#[derive(Debug, Deserialize, TS)]
pub struct TestsRequest {
    pub code: String,
}

#[derive(Debug, Deserialize, TS)]
pub struct StoryRequest {
    pub idea: String,
}

fn billing(state: &AppState) -> Result<&Arc<AiBillingService>, ApiError> {
    state.billing.as_ref().ok_or(ApiError::CompletionUnavailable)
}

pub async fn explain_code(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ExplainRequest>,
) -> Result<ResponseJson<ApiResponse<CodeExplanation>>, ApiError> {
    let billing = billing(&state)?;
    CreditLedger::ensure_account(&state.db.pool, &user_id).await?;

    let explanation = billing
        .explain_code(&state.db.pool, &user_id, &payload.code)
        .await?;
    Ok(ResponseJson(ApiResponse::success(explanation)))
}

pub async fn suggest_fix(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<FixRequest>,
) -> Result<ResponseJson<ApiResponse<FixSuggestion>>, ApiError> {
    let billing = billing(&state)?;
    CreditLedger::ensure_account(&state.db.pool, &user_id).await?;

    let suggestion = billing
        .suggest_fix(&state.db.pool, &user_id, &payload.code, &payload.error_message)
        .await?;
    Ok(ResponseJson(ApiResponse::success(suggestion)))
}

pub async fn generate_tests(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<TestsRequest>,
) -> Result<ResponseJson<ApiResponse<GeneratedTests>>, ApiError> {
    let billing = billing(&state)?;
    CreditLedger::ensure_account(&state.db.pool, &user_id).await?;

    let tests = billing
        .generate_tests(&state.db.pool, &user_id, &payload.code)
        .await?;
    Ok(ResponseJson(ApiResponse::success(tests)))
}

pub async fn generate_story(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<StoryRequest>,
) -> Result<ResponseJson<ApiResponse<GeneratedStory>>, ApiError> {
    let billing = billing(&state)?;
    CreditLedger::ensure_account(&state.db.pool, &user_id).await?;

    let story = billing
        .generate_story(&state.db.pool, &user_id, &payload.idea)
        .await?;
    Ok(ResponseJson(ApiResponse::success(story)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ai/explain", post(explain_code))
        .route("/ai/fix", post(suggest_fix))
        .route("/ai/tests", post(generate_tests))
        .route("/ai/story", post(generate_story))
}
