use axum::{Router, response::Json as ResponseJson, routing::get};

use crate::AppState;
use utils::response::ApiResponse;

pub async fn health() -> ResponseJson<ApiResponse<&'static str>> {
    ResponseJson(ApiResponse::success("ok"))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
