//! HTTP header and path constants for the proxy service
//!
//! Centralizes header names, route paths and content types so handlers,
//! middleware and tests all agree on the wire strings.

use ::http::header;

/// Header name for request ID used for tracing and correlation
pub const X_REQUEST_ID: &str = "x-request-id";

/// Standard header re-exports for convenience
pub use header::{AUTHORIZATION, CONTENT_TYPE};

/// Well-known paths
pub mod paths {
    /// Chat completions endpoint, the proxied surface
    pub const CHAT_COMPLETIONS: &str = "/v1/chat/completions";

    /// Aggregated model listing endpoint
    pub const MODELS: &str = "/v1/models";

    /// Health check endpoint path
    pub const HEALTH: &str = "/health";

    /// Metrics endpoint path
    pub const METRICS: &str = "/metrics";
}

/// Common content types
pub mod content_types {
    pub const JSON: &str = "application/json";
    pub const EVENT_STREAM: &str = "text/event-stream";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_constants() {
        assert!(X_REQUEST_ID.starts_with("x-"));

        assert!(paths::CHAT_COMPLETIONS.starts_with("/v1/"));
        assert!(paths::MODELS.starts_with("/v1/"));
        assert!(paths::HEALTH.starts_with('/'));
        assert!(paths::METRICS.starts_with('/'));
    }
}
