use axum::{
    Json, Router,
    extract::{Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{account::Account, credit_transaction::CreditTransaction};
use serde::Deserialize;
use services::services::ledger::CreditLedger;
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, auth::AuthUser, error::ApiError};

const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Deserialize, TS)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, TS)]
pub struct DeductRequest {
    pub amount: i64,
}

/// Returns the caller's account, creating it with the signup grant on first
/// authenticated request.
pub async fn get_account(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<ResponseJson<ApiResponse<Account>>, ApiError> {
    let account = CreditLedger::ensure_account(&state.db.pool, &user_id).await?;
    Ok(ResponseJson(ApiResponse::success(account)))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<TransactionsQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<CreditTransaction>>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 500);
    let transactions =
        CreditTransaction::find_by_user_id(&state.db.pool, &user_id, limit).await?;
    Ok(ResponseJson(ApiResponse::success(transactions)))
}

pub async fn deduct(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<DeductRequest>,
) -> Result<ResponseJson<ApiResponse<Account>>, ApiError> {
    let account = CreditLedger::deduct(&state.db.pool, &user_id, payload.amount).await?;
    Ok(ResponseJson(ApiResponse::success(account)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/credits/account", get(get_account))
        .route("/credits/transactions", get(list_transactions))
        .route("/credits/deduct", post(deduct))
}
