//! HTTP surface of the proxy
//!
//! Wires the resolver, forwarding engine and recorder together behind an
//! axum router. The chat-completions handler is the hot path: parse,
//! resolve, report the started exchange, hand off to the forwarder.
//! Everything else here is the service surface around it: aggregated
//! model listing, health, recorder metrics.

use crate::domain::exchange::ExchangeId;
use crate::proxy::error_response::{
    extract_request_id, proxy_error_response, standard_error_response,
};
use crate::proxy::forwarder::ForwardingEngine;
use crate::proxy::headers::{paths, AUTHORIZATION};
use crate::proxy::middleware_stack::ProxyMiddlewareStack;
use crate::proxy::resolver::RequestResolver;
use crate::proxy::types::{ProxyConfig, ProxyError, ProxyResult};
use crate::recorder::tap::{headers_vec, redact_authorization};
use crate::recorder::types::ExchangeContext;
use crate::recorder::{ExchangeStore, ExchangeTap, RingBuffer, TranscriptProcessor};
use crate::routing::RoutingTable;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

/// The proxy service and its supporting pipeline
pub struct ProxyService {
    config: Arc<ProxyConfig>,
    table: RoutingTable,
    store: Arc<dyn ExchangeStore>,
    ring_buffer: Arc<RingBuffer>,
    tap: ExchangeTap,
    resolver: RequestResolver,
    forwarder: ForwardingEngine,
}

/// Shared handler state; keeps the recorder shutdown channel alive for
/// the lifetime of the router
struct AppState {
    service: ProxyService,
    _shutdown_tx: mpsc::Sender<()>,
}

impl ProxyService {
    pub fn new(
        config: ProxyConfig,
        table: RoutingTable,
        store: Arc<dyn ExchangeStore>,
    ) -> ProxyResult<Self> {
        let config = Arc::new(config);
        let ring_buffer = Arc::new(RingBuffer::new(&config.ring_buffer));
        let tap = ExchangeTap::new(Arc::clone(&ring_buffer));
        let forwarder = ForwardingEngine::new(Arc::clone(&config), tap.clone())?;
        let resolver = RequestResolver::new(table.clone());

        Ok(Self {
            config,
            table,
            store,
            ring_buffer,
            tap,
            resolver,
            forwarder,
        })
    }

    /// Build the router, starting the background transcript processor
    pub fn into_router(self) -> Router {
        let (processor, shutdown_tx) =
            TranscriptProcessor::new(Arc::clone(&self.ring_buffer), Arc::clone(&self.store));
        tokio::spawn(processor.run());
        info!("Proxy service router initialized");

        let state = Arc::new(AppState {
            service: self,
            _shutdown_tx: shutdown_tx,
        });

        let router = Router::new()
            .route(paths::CHAT_COMPLETIONS, post(chat_completions))
            .route(paths::MODELS, get(list_models))
            .route(paths::HEALTH, get(health))
            .route(paths::METRICS, get(metrics))
            .fallback(not_found)
            .with_state(state);

        ProxyMiddlewareStack::new().apply_to_router(router)
    }
}

/// POST /v1/chat/completions
///
/// The request id middleware runs before this handler, so the id is
/// always present in the request headers and every error envelope
/// carries it.
async fn chat_completions(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let request_id = extract_request_id(request.headers());
    match proxy_chat(&state.service, request).await {
        Ok(response) => response,
        Err(error) => proxy_error_response(&error, request_id.as_deref()),
    }
}

/// Parse, resolve, report the started exchange, hand off to the forwarder
async fn proxy_chat(service: &ProxyService, request: Request) -> ProxyResult<Response> {
    let (parts, body) = request.into_parts();

    let max_size = service.config.max_request_size;
    let bytes = axum::body::to_bytes(body, *max_size.as_ref())
        .await
        .map_err(|_| ProxyError::RequestTooLarge { max_size })?;
    let payload: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ProxyError::InvalidRequest(format!("body is not valid JSON: {e}")))?;

    let resolved = service.resolver.resolve(&payload, parts.uri.path())?;

    let mut request_headers = headers_vec(&parts.headers);
    if !service.config.store_authorization_headers {
        redact_authorization(&mut request_headers);
    }

    let exchange_id = ExchangeId::new();
    service.tap.exchange_started(
        exchange_id,
        ExchangeContext {
            proxy_model_name: resolved.route.proxy_model_name.clone(),
            backend_model_name: resolved.route.backend_model_name.clone(),
            backend_url: resolved.route.backend_url.clone(),
            request_payload: resolved.payload.clone(),
            request_headers,
            is_streaming: resolved.is_streaming,
        },
    );

    let client_authorization = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    service
        .forwarder
        .forward(exchange_id, resolved, client_authorization)
        .await
}

/// GET /v1/models
///
/// Fans out to every distinct backend model-listing endpoint and merges
/// the results. A backend that fails to answer is logged and skipped;
/// the listing degrades instead of erroring.
async fn list_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let service = &state.service;
    let client_authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    // One query per distinct endpoint, not per route
    let mut queried = HashSet::new();
    let mut targets = Vec::new();
    for route in service.table.snapshot().values() {
        let endpoint = models_endpoint(route.backend_url.as_ref());
        if queried.insert(endpoint.clone()) {
            targets.push((endpoint, route.clone()));
        }
    }

    let mut data = Vec::new();
    let mut seen_ids = HashSet::new();
    for (endpoint, route) in targets {
        let mut request = service
            .forwarder
            .client_for(route.ignore_tls_verify)
            .get(&endpoint);
        request = match (&route.backend_api_key, &client_authorization) {
            (Some(key), _) => request.bearer_auth(key.as_ref()),
            (None, Some(authorization)) => request.header(AUTHORIZATION, authorization),
            (None, None) => request,
        };

        let models = match timeout(service.config.connect_timeout, async {
            request.send().await?.json::<Value>().await
        })
        .await
        {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!(endpoint = %endpoint, error = %e, "Model listing backend failed, skipping");
                continue;
            }
            Err(_) => {
                warn!(endpoint = %endpoint, "Model listing backend timed out, skipping");
                continue;
            }
        };

        if let Some(entries) = models.get("data").and_then(Value::as_array) {
            for entry in entries {
                match entry.get("id").and_then(Value::as_str) {
                    Some(id) if !seen_ids.insert(id.to_string()) => {}
                    _ => data.push(entry.clone()),
                }
            }
        }
    }

    Json(json!({"object": "list", "data": data})).into_response()
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// GET /metrics
async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.ring_buffer.stats())
}

async fn not_found(headers: HeaderMap) -> Response {
    standard_error_response(StatusCode::NOT_FOUND, extract_request_id(&headers).as_deref())
}

/// Model-listing endpoint for a backend route URL
///
/// A chat-completions URL has its trailing segment swapped for `/models`;
/// anything else falls back to `/v1/models` at the origin.
fn models_endpoint(backend_url: &str) -> String {
    let trimmed = backend_url.trim_end_matches('/');
    if let Some(base) = trimmed.strip_suffix("/chat/completions") {
        format!("{base}/models")
    } else {
        format!("{}{}", origin_of(trimmed), paths::MODELS)
    }
}

/// Scheme and authority of a URL, dropping any path
fn origin_of(url: &str) -> String {
    url.parse::<http::Uri>()
        .ok()
        .and_then(|uri| {
            let scheme = uri.scheme_str()?;
            let authority = uri.authority()?;
            Some(format!("{scheme}://{authority}"))
        })
        .unwrap_or_else(|| url.to_string())
}
