use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::error::AnalyticsError;

/// JSON envelope shared by every non-WebSocket response
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok(data)
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            error: Some(error.into()),
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, AnalyticsError>;

impl IntoResponse for AnalyticsError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AnalyticsError::Invalid(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AnalyticsError::Storage(e) => {
                error!(error = %e, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal storage error".to_string(),
                )
            }
        };

        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_skips_absent_fields() {
        let json = serde_json::to_value(ApiResponse::ok(3)).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "data": 3}));

        let json = serde_json::to_value(ApiResponse::<()>::error("nope")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "nope"}));
    }

    #[test]
    fn test_unit_data_serializes_as_null() {
        let json = serde_json::to_value(ApiResponse::ok_with_message((), "tracked")).unwrap();
        assert_eq!(json["data"], serde_json::Value::Null);
        assert!(json.as_object().unwrap().contains_key("data"));
        assert_eq!(json["message"], "tracked");
    }

    #[test]
    fn test_error_status_codes() {
        let invalid = AnalyticsError::Invalid("bad".to_string()).into_response();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let storage = AnalyticsError::Storage(crate::storage::StorageError::Other(
            anyhow::anyhow!("disk full"),
        ))
        .into_response();
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
