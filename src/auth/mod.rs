use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::api::handlers::ErrorResponse;

pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Shared-secret check for the stats endpoint.
pub struct AuthService {
    api_key: Option<String>,
}

impl AuthService {
    pub fn new(api_key: Option<String>) -> Self {
        let api_key = api_key.filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!("API_KEY is not set, stats requests are not authenticated");
        }
        Self { api_key }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn validate_key(&self, key: &str) -> bool {
        match &self.api_key {
            Some(expected) => bool::from(expected.as_bytes().ct_eq(key.as_bytes())),
            None => true,
        }
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
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid or missing API key".to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        let auth = AuthService::new(Some("s3cret".to_string()));
        assert!(auth.is_enabled());
        assert!(auth.validate_key("s3cret"));
        assert!(!auth.validate_key("s3cre"));
        assert!(!auth.validate_key(""));
    }

    #[test]
    fn test_missing_secret_disables_check() {
        let auth = AuthService::new(Some(String::new()));
        assert!(!auth.is_enabled());
        assert!(auth.validate_key("anything"));
    }
}
