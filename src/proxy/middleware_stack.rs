//! Middleware stack builder for clean composition
//!
//! This module provides a builder pattern for composing the Tower middleware stack,
//! making it easier to maintain and test the middleware pipeline.

use crate::proxy::middleware::{
    error_handling_middleware, logging_middleware, request_id_middleware,
};
use axum::{middleware::from_fn, Router};

/// Builder for composing the proxy middleware stack
#[derive(Clone, Copy, Debug, Default)]
pub struct ProxyMiddlewareStack;

impl ProxyMiddlewareStack {
    /// Create a new middleware stack builder
    pub fn new() -> Self {
        Self
    }

    /// Apply the complete middleware stack to a router
    ///
    /// The middleware are applied in the following order (outer to inner):
    /// 1. Request ID generation/propagation
    /// 2. Logging (with request ID)
    /// 3. Error handling
    ///
    /// This ordering ensures:
    /// - Every request has an ID for correlation
    /// - All requests are logged, including ones that fail resolution
    /// - Errors are properly formatted with request IDs
    pub fn apply_to_router<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router
            // Apply middleware in reverse order (innermost first in the builder)
            .layer(from_fn(error_handling_middleware))
            .layer(from_fn(logging_middleware))
            .layer(from_fn(request_id_middleware))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::headers::{paths, X_REQUEST_ID};
    use axum::{body::Body, http::StatusCode, response::IntoResponse};
    use tower::ServiceExt;

    async fn handler() -> impl IntoResponse {
        StatusCode::OK
    }

    #[tokio::test]
    async fn test_stack_attaches_request_id() {
        let router = Router::new()
            .route("/test", axum::routing::get(handler))
            .with_state(());
        let app = ProxyMiddlewareStack::new().apply_to_router(router);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn test_stack_keeps_request_id_on_errors() {
        let router = Router::new()
            .route(paths::HEALTH, axum::routing::get(handler))
            .with_state(());
        let app = ProxyMiddlewareStack::new().apply_to_router(router);

        // Unknown path falls through to the router's default 404
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }
}
