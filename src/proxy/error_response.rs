//! Unified error response handling for the proxy service
//!
//! This module provides consistent error formatting across all middleware
//! and handlers, ensuring proper request ID correlation and standardized
//! error messages.

use crate::proxy::headers::X_REQUEST_ID;
use crate::proxy::types::ProxyError;
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Unique error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Request ID for correlation
    pub request_id: Option<String>,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
            details: None,
        }
    }

    /// Add request ID for correlation
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Add additional error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Convert to HTTP response with proper headers
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        let request_id = self.request_id.clone();
        let mut response = (status, Json(self)).into_response();

        if let Some(id) = request_id {
            if let Ok(header_value) = HeaderValue::from_str(&id) {
                response.headers_mut().insert(X_REQUEST_ID, header_value);
            }
        }

        response
    }
}

/// Extension trait for consistent error formatting
pub trait ErrorResponseExt {
    /// Convert to standardized error response
    fn to_error_response(&self) -> ErrorResponse;

    /// Get the appropriate HTTP status code
    fn status_code(&self) -> StatusCode;
}

impl ErrorResponseExt for ProxyError {
    fn to_error_response(&self) -> ErrorResponse {
        use ProxyError::*;

        let code = match self {
            RouteNotFound(_) => "ROUTE_NOT_FOUND",
            InvalidRequest(_) => "INVALID_REQUEST",
            RequestTooLarge { .. } => "REQUEST_TOO_LARGE",
            BackendUnreachable(_) => "BACKEND_UNREACHABLE",
            BackendTimeout(_) => "BACKEND_TIMEOUT",
            BackendProtocol(_) => "BACKEND_PROTOCOL_ERROR",
            Http(_) => "HTTP_ERROR",
            Serialization(_) => "SERIALIZATION_ERROR",
            Internal(_) => "INTERNAL_ERROR",
        };

        ErrorResponse::new(code, self.to_string())
    }

    fn status_code(&self) -> StatusCode {
        use ProxyError::*;

        match self {
            RouteNotFound(_) => StatusCode::NOT_FOUND,
            InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            BackendUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BackendProtocol(_) => StatusCode::BAD_GATEWAY,
            Http(_) | Serialization(_) | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        proxy_error_response(&self, None)
    }
}

/// Render a proxy error as the standard envelope, correlated to the
/// request when its id is known
pub fn proxy_error_response(error: &ProxyError, request_id: Option<&str>) -> Response {
    let mut body = error.to_error_response();
    if let Some(id) = request_id {
        body = body.with_request_id(id);
    }
    body.into_response_with_status(error.status_code())
}

/// Create an error response for common HTTP errors
pub fn standard_error_response(status: StatusCode, request_id: Option<&str>) -> Response {
    let (code, message) = match status {
        StatusCode::BAD_REQUEST => ("BAD_REQUEST", "Invalid request"),
        StatusCode::NOT_FOUND => ("NOT_FOUND", "Resource not found"),
        StatusCode::METHOD_NOT_ALLOWED => ("METHOD_NOT_ALLOWED", "Method not allowed"),
        StatusCode::PAYLOAD_TOO_LARGE => ("PAYLOAD_TOO_LARGE", "Request too large"),
        StatusCode::INTERNAL_SERVER_ERROR => ("INTERNAL_ERROR", "Internal server error"),
        StatusCode::BAD_GATEWAY => ("BAD_GATEWAY", "Upstream service error"),
        StatusCode::SERVICE_UNAVAILABLE => {
            ("SERVICE_UNAVAILABLE", "Service temporarily unavailable")
        }
        StatusCode::GATEWAY_TIMEOUT => ("GATEWAY_TIMEOUT", "Upstream service timeout"),
        _ => ("ERROR", "An error occurred"),
    };

    let mut error = ErrorResponse::new(code, message);
    if let Some(id) = request_id {
        error = error.with_request_id(id);
    }

    error.into_response_with_status(status)
}

/// Helper to extract request ID from headers
pub fn extract_request_id(headers: &http::HeaderMap) -> Option<String> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}
