use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::api::response::ApiResponse;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Gate for write-only analytics endpoints
pub struct AuthService {
    api_key: Option<String>,
}

impl AuthService {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn validate_key(&self, key: &str) -> bool {
        // No key configured: the gate is open
        let Some(expected) = &self.api_key else {
            return true;
        };

        expected.as_bytes().ct_eq(key.as_bytes()).into()
    }
}

pub async fn auth_middleware(
    auth_service: Arc<AuthService>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if auth_service.validate_key(api_key) {
        next.run(request).await
    } else {
        debug!(path = %request.uri().path(), "rejected request with invalid or missing API key");
        (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error("Invalid or missing API key")),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_when_no_key_configured() {
        let auth = AuthService::new(None);
        assert!(!auth.is_enabled());
        assert!(auth.validate_key(""));

        let empty = AuthService::new(Some(String::new()));
        assert!(!empty.is_enabled());
        assert!(empty.validate_key("anything"));
    }

    #[test]
    fn test_key_must_match_exactly() {
        let auth = AuthService::new(Some("s3cret".to_string()));
        assert!(auth.is_enabled());
        assert!(auth.validate_key("s3cret"));
        assert!(!auth.validate_key("s3cre"));
        assert!(!auth.validate_key("s3cret "));
        assert!(!auth.validate_key(""));
    }
}
