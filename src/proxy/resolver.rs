//! Request resolution against the routing table
//!
//! Turns an inbound chat-completions payload into a fully specified
//! outbound call: backend endpoint, rewritten body, credential and
//! streaming flag. Pure lookup and transform; the routing table is never
//! modified here.

use crate::domain::routes::{BackendRoute, ProxyModelName};
use crate::proxy::types::{ProxyError, ProxyResult};
use crate::routing::RoutingTable;
use http::Uri;
use serde_json::Value;

/// Fully specified outbound call produced by a successful resolution
#[derive(Debug, Clone)]
pub struct ResolvedCall {
    /// The route that matched
    pub route: BackendRoute,
    /// Absolute URL the request will be sent to
    pub endpoint: String,
    /// Client payload with `model` replaced by the backend model name;
    /// every other field is preserved verbatim
    pub payload: Value,
    /// Whether the client asked for a streamed response
    pub is_streaming: bool,
}

/// Resolves inbound requests to backend calls
#[derive(Clone)]
pub struct RequestResolver {
    table: RoutingTable,
}

impl RequestResolver {
    pub fn new(table: RoutingTable) -> Self {
        Self { table }
    }

    /// Resolve a client payload against the routing table
    ///
    /// `inbound_path` is the path the client called, appended to routes
    /// whose URL is a bare origin.
    pub fn resolve(&self, payload: &Value, inbound_path: &str) -> ProxyResult<ResolvedCall> {
        let model = payload
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProxyError::InvalidRequest("missing or non-string 'model' field".to_string())
            })?;

        // A name the table could never hold is just an unknown model
        let name = ProxyModelName::try_new(model.to_string())
            .map_err(|_| ProxyError::RouteNotFound(model.to_string()))?;

        let route = self
            .table
            .route_for(&name)
            .ok_or_else(|| ProxyError::RouteNotFound(model.to_string()))?;

        let mut rewritten = payload.clone();
        if let Some(object) = rewritten.as_object_mut() {
            object.insert(
                "model".to_string(),
                Value::String(route.backend_model_name.as_ref().to_string()),
            );
        }

        let is_streaming = payload
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let endpoint = resolve_endpoint(route.backend_url.as_ref(), inbound_path)?;

        Ok(ResolvedCall {
            route,
            endpoint,
            payload: rewritten,
            is_streaming,
        })
    }
}

/// Resolve the final URL for the outbound request
///
/// A route URL that already carries a path is used as-is; a bare origin
/// has the inbound request path appended.
pub fn resolve_endpoint(backend_url: &str, inbound_path: &str) -> ProxyResult<String> {
    let uri: Uri = backend_url
        .parse()
        .map_err(|_| ProxyError::Internal(format!("invalid backend URL '{backend_url}'")))?;

    if uri.path() != "/" && !uri.path().is_empty() {
        Ok(backend_url.to_string())
    } else {
        Ok(format!(
            "{}{}",
            backend_url.trim_end_matches('/'),
            inbound_path
        ))
    }
}
