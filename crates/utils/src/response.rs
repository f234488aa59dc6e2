//! Uniform JSON envelope for all API responses.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Wrapper returned by every route. `error_code` is a stable machine-readable
/// identifier (e.g. `insufficient_balance`) that clients can branch on,
/// independent of the human-readable `message`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error_code: Option<String>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_code: None,
            message: None,
        }
    }

    pub fn error_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_code: Some(code.into()),
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_has_no_error_fields() {
        let res = ApiResponse::success(42);
        assert!(res.success);
        assert_eq!(res.data, Some(42));
        assert!(res.error_code.is_none());
        assert!(res.message.is_none());
    }

    #[test]
    fn test_error_with_code() {
        let res: ApiResponse<()> = ApiResponse::error_with_code("insufficient_balance", "have 5, need 10");
        assert!(!res.success);
        assert_eq!(res.error_code.as_deref(), Some("insufficient_balance"));
    }
}
