//! Forwarding engine
//!
//! Issues the outbound backend call and relays the response to the client,
//! buffered or streamed. Every byte that reaches the client also reaches
//! the recorder tap: buffered bodies as one chunk, streamed responses as
//! one chunk per SSE data frame, in backend arrival order. Relay never
//! waits on the recorder; the tap is a fire-and-forget ring buffer write.

use crate::domain::exchange::{ExchangeId, FailureKind};
use crate::proxy::headers::{content_types, CONTENT_TYPE};
use crate::proxy::resolver::ResolvedCall;
use crate::proxy::sse::{SseEvent, SseFrameParser};
use crate::proxy::types::{ProxyConfig, ProxyError, ProxyResult};
use crate::recorder::tap::{headers_vec, ExchangeTap};
use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::Uri;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::debug;

/// Frames buffered towards the client before backpressure reaches the
/// upstream read loop
const RELAY_CHANNEL_CAPACITY: usize = 64;

/// Hop-by-hop headers that must not be relayed verbatim
const SKIPPED_RESPONSE_HEADERS: [&str; 3] = ["transfer-encoding", "connection", "content-length"];

/// Forwards resolved calls to their backend and relays the response
#[derive(Clone)]
pub struct ForwardingEngine {
    config: Arc<ProxyConfig>,
    tap: ExchangeTap,
    verified: reqwest::Client,
    /// Client with certificate verification disabled, for routes that
    /// opt in via `ignore_tls_verify`
    insecure: reqwest::Client,
}

impl ForwardingEngine {
    pub fn new(config: Arc<ProxyConfig>, tap: ExchangeTap) -> ProxyResult<Self> {
        let verified = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to build HTTP client: {e}")))?;
        let insecure = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            tap,
            verified,
            insecure,
        })
    }

    /// HTTP client matching a route's TLS verification setting
    pub(crate) fn client_for(&self, ignore_tls_verify: bool) -> &reqwest::Client {
        if ignore_tls_verify {
            &self.insecure
        } else {
            &self.verified
        }
    }

    /// Forward a resolved call and relay the backend response
    ///
    /// The returned response streams when the backend streams. Errors on
    /// this path have already been reported to the recorder; the caller
    /// only maps them onto the client-facing wire format.
    pub async fn forward(
        &self,
        exchange_id: ExchangeId,
        call: ResolvedCall,
        client_authorization: Option<String>,
    ) -> ProxyResult<Response> {
        let body = serde_json::to_vec(&call.payload)?;

        let mut request = self
            .client_for(call.route.ignore_tls_verify)
            .post(&call.endpoint)
            .header(CONTENT_TYPE, content_types::JSON)
            .body(body);
        request = match (&call.route.backend_api_key, client_authorization) {
            (Some(key), _) => request.bearer_auth(key.as_ref()),
            (None, Some(authorization)) => request.header(http::header::AUTHORIZATION, authorization),
            (None, None) => request,
        };

        // Connection establishment is bounded by the client's own
        // connect_timeout; the wait for response headers covers backend
        // generation time, so it gets the read timeout
        let response = match timeout(self.config.read_timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let (kind, error) = if e.is_timeout() {
                    (
                        FailureKind::BackendTimeout,
                        ProxyError::BackendTimeout(self.config.connect_timeout),
                    )
                } else {
                    (
                        FailureKind::BackendUnreachable,
                        ProxyError::BackendUnreachable(backend_base(&call.endpoint)),
                    )
                };
                self.tap
                    .exchange_failed(exchange_id, kind, e.to_string(), None, vec![]);
                return Err(error);
            }
            Err(_) => {
                let error = ProxyError::BackendTimeout(self.config.read_timeout);
                self.tap.exchange_failed(
                    exchange_id,
                    FailureKind::BackendTimeout,
                    error.to_string(),
                    None,
                    vec![],
                );
                return Err(error);
            }
        };

        let status = response.status();
        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(content_types::EVENT_STREAM));

        if call.is_streaming && status.is_success() {
            if is_sse {
                Ok(self.relay_streaming(exchange_id, response))
            } else {
                self.fail_non_sse(exchange_id, response).await
            }
        } else {
            // Non-streaming calls, and backend HTTP error statuses on
            // streaming calls, are relayed buffered and verbatim
            self.relay_buffered(exchange_id, response).await
        }
    }

    /// Await the full backend response and relay it as one unit
    async fn relay_buffered(
        &self,
        exchange_id: ExchangeId,
        response: reqwest::Response,
    ) -> ProxyResult<Response> {
        let status = response.status();
        let headers = response.headers().clone();
        let recorded_headers = headers_vec(&headers);

        let body = match timeout(self.config.read_timeout, response.bytes()).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                self.tap.exchange_failed(
                    exchange_id,
                    FailureKind::BackendUnreachable,
                    format!("error reading backend response: {e}"),
                    Some(status.as_u16()),
                    recorded_headers,
                );
                return Err(ProxyError::BackendUnreachable(e.to_string()));
            }
            Err(_) => {
                let error = ProxyError::BackendTimeout(self.config.read_timeout);
                self.tap.exchange_failed(
                    exchange_id,
                    FailureKind::BackendTimeout,
                    error.to_string(),
                    Some(status.as_u16()),
                    recorded_headers,
                );
                return Err(error);
            }
        };

        self.tap.chunk_received(exchange_id, body.to_vec());
        self.tap
            .exchange_completed(exchange_id, status.as_u16(), recorded_headers);

        let mut builder = Response::builder().status(status);
        for (name, value) in headers.iter() {
            if !SKIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
                builder = builder.header(name, value);
            }
        }
        Ok(builder.body(Body::from(body))?)
    }

    /// Relay an SSE backend response frame by frame
    ///
    /// The upstream read loop runs in its own task so relay continues to
    /// drain and record after the client goes away, up to the drain
    /// timeout.
    fn relay_streaming(&self, exchange_id: ExchangeId, response: reqwest::Response) -> Response {
        let status = response.status();
        let recorded_headers = headers_vec(response.headers());
        let (frame_tx, frame_rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);

        let pump = StreamPump {
            exchange_id,
            tap: self.tap.clone(),
            status_code: status.as_u16(),
            response_headers: recorded_headers,
            read_timeout: self.config.read_timeout,
            drain_timeout: self.config.drain_timeout,
        };
        tokio::spawn(pump.run(response.bytes_stream(), frame_tx));

        Response::builder()
            .status(status)
            .header(CONTENT_TYPE, content_types::EVENT_STREAM)
            .header(http::header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(RelayStream { receiver: frame_rx }))
            // Static status and headers, the builder cannot fail
            .unwrap_or_else(|_| Response::new(Body::empty()))
    }

    /// A streaming call whose 2xx backend response is not SSE
    async fn fail_non_sse(
        &self,
        exchange_id: ExchangeId,
        response: reqwest::Response,
    ) -> ProxyResult<Response> {
        let status = response.status();
        let recorded_headers = headers_vec(response.headers());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<none>")
            .to_string();

        // Keep whatever the backend sent for debugging
        if let Ok(Ok(body)) = timeout(self.config.read_timeout, response.bytes()).await {
            if !body.is_empty() {
                self.tap.chunk_received(exchange_id, body.to_vec());
            }
        }

        let error = ProxyError::BackendProtocol(format!(
            "expected '{}' response, got '{content_type}'",
            content_types::EVENT_STREAM
        ));
        self.tap.exchange_failed(
            exchange_id,
            FailureKind::BackendProtocol,
            error.to_string(),
            Some(status.as_u16()),
            recorded_headers,
        );
        Err(error)
    }
}

/// Origin part of an endpoint, for client-facing connect error messages
fn backend_base(endpoint: &str) -> String {
    endpoint
        .parse::<Uri>()
        .ok()
        .and_then(|uri| {
            let scheme = uri.scheme_str()?;
            let authority = uri.authority()?;
            Some(format!("{scheme}://{authority}"))
        })
        .unwrap_or_else(|| endpoint.to_string())
}

/// Terminal SSE frame sent to a client when a stream fails mid-flight
fn error_frame(error_type: &str, message: &str) -> Bytes {
    let payload = serde_json::json!({
        "error": {"type": error_type, "message": message}
    });
    Bytes::from(format!("data: {payload}\n\n"))
}

pin_project! {
    /// Client-facing body stream fed by the pump task
    struct RelayStream {
        receiver: mpsc::Receiver<Result<Bytes, std::io::Error>>,
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().receiver.poll_recv(cx)
    }
}

/// Upstream read loop for one streaming exchange
struct StreamPump {
    exchange_id: ExchangeId,
    tap: ExchangeTap,
    status_code: u16,
    response_headers: Vec<(String, String)>,
    read_timeout: Duration,
    drain_timeout: Duration,
}

impl StreamPump {
    async fn run(
        self,
        mut upstream: impl Stream<Item = reqwest::Result<Bytes>> + Unpin,
        client: mpsc::Sender<Result<Bytes, std::io::Error>>,
    ) {
        let mut parser = SseFrameParser::new();
        // Some while the client is still listening
        let mut client_tx = Some(client);
        let mut drain_deadline: Option<Instant> = None;

        loop {
            let wait = match drain_deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    self.read_timeout.min(remaining)
                }
                None => self.read_timeout,
            };

            let bytes = match timeout(wait, upstream.next()).await {
                // Drain window closed while waiting for more backend data
                Err(_) if drain_deadline.is_some() => break,
                Err(_) => {
                    self.fail(
                        FailureKind::BackendTimeout,
                        format!("no data from backend for {:?}", self.read_timeout),
                        &mut client_tx,
                        "timeout_error",
                        "Backend timed out mid-stream",
                    )
                    .await;
                    return;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    self.fail(
                        FailureKind::BackendUnreachable,
                        format!("backend stream error: {e}"),
                        &mut client_tx,
                        "api_error",
                        "Backend connection lost mid-stream",
                    )
                    .await;
                    return;
                }
                Ok(Some(Ok(bytes))) => bytes,
            };

            for event in parser.push(&bytes) {
                match event {
                    SseEvent::Frame(payload) => {
                        // Malformed payloads are retained verbatim before
                        // the exchange fails
                        let well_formed =
                            serde_json::from_slice::<serde_json::Value>(&payload).is_ok();
                        self.tap.chunk_received(self.exchange_id, payload);
                        if !well_formed {
                            self.fail(
                                FailureKind::BackendProtocol,
                                "data frame payload is not JSON".to_string(),
                                &mut client_tx,
                                "api_error",
                                "Backend sent a malformed stream frame",
                            )
                            .await;
                            return;
                        }
                    }
                    SseEvent::Done => {}
                }
            }

            if let Some(tx) = &client_tx {
                if tx.send(Ok(bytes)).await.is_err() {
                    debug!(
                        exchange_id = %self.exchange_id,
                        "Client disconnected, draining backend stream"
                    );
                    client_tx = None;
                    drain_deadline = Some(Instant::now() + self.drain_timeout);
                }
            }

            if parser.is_done() {
                break;
            }
        }

        if client_tx.is_none() {
            self.tap.exchange_failed(
                self.exchange_id,
                FailureKind::ClientAborted,
                "client disconnected during relay",
                Some(self.status_code),
                self.response_headers.clone(),
            );
        } else if !parser.is_done() {
            self.fail(
                FailureKind::BackendProtocol,
                "stream ended before the [DONE] sentinel".to_string(),
                &mut client_tx,
                "api_error",
                "Backend stream ended unexpectedly",
            )
            .await;
        } else {
            self.tap.exchange_completed(
                self.exchange_id,
                self.status_code,
                self.response_headers.clone(),
            );
        }
    }

    /// Report the failure once and, if the client is still listening,
    /// send it a terminal error frame
    async fn fail(
        &self,
        kind: FailureKind,
        detail: String,
        client_tx: &mut Option<mpsc::Sender<Result<Bytes, std::io::Error>>>,
        error_type: &str,
        message: &str,
    ) {
        self.tap.exchange_failed(
            self.exchange_id,
            kind,
            detail,
            Some(self.status_code),
            self.response_headers.clone(),
        );
        if let Some(tx) = client_tx.take() {
            let _ = tx.send(Ok(error_frame(error_type, message))).await;
        }
    }
}
