use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use services::services::{
    billing::BillingError, ledger::LedgerError, task_lifecycle::TaskLifecycleError,
};
use thiserror::Error;
use tracing::error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Lifecycle(#[from] TaskLifecycleError),
    #[error(transparent)]
    Billing(#[from] BillingError),
    #[error("missing or empty x-user-id header")]
    Unauthenticated,
    #[error("AI actions are not configured on this deployment")]
    CompletionUnavailable,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ledger(e) => e.code(),
            Self::Lifecycle(e) => e.code(),
            Self::Billing(e) => e.code(),
            Self::Unauthenticated => "unauthenticated",
            Self::CompletionUnavailable => "completion_unavailable",
            Self::Database(_) => "database_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self.code() {
            "account_not_found" | "task_not_found" => StatusCode::NOT_FOUND,
            "insufficient_balance" | "invalid_task_state" => StatusCode::CONFLICT,
            "invalid_amount" => StatusCode::BAD_REQUEST,
            "not_authorized" => StatusCode::FORBIDDEN,
            "unauthenticated" => StatusCode::UNAUTHORIZED,
            "generation_failed" => StatusCode::BAD_GATEWAY,
            "completion_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.code() == "escrow_integrity" {
            error!(error = %self, "ledger consistency fault surfaced to a client");
        }

        let status = self.status();
        let body = ApiResponse::<()>::error_with_code(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = ApiError::Ledger(LedgerError::InsufficientBalance {
            available: 1,
            requested: 5,
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err = ApiError::Lifecycle(TaskLifecycleError::NotAuthorized { action: "approve" });
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = ApiError::Ledger(LedgerError::InvalidAmount(0));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        assert_eq!(ApiError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::CompletionUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
