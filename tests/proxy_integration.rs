//! End-to-end tests: router in, mock backend out, transcript store checked
//! after the recorder catches up.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tapwire::domain::exchange::{ExchangeStatus, FailureKind, ProxyExchange};
use tapwire::domain::routes::{BackendModelName, BackendRoute, BackendUrl, ProxyModelName};
use tapwire::proxy::{ProxyConfig, ProxyService};
use tapwire::recorder::{ExchangeFilter, ExchangeStore, MemoryExchangeStore};
use tapwire::routing::RoutingTable;
use tower::ServiceExt;

const CHAT_PATH: &str = "/v1/chat/completions";

fn route_to(name: &str, backend_url: &str) -> BackendRoute {
    BackendRoute {
        proxy_model_name: ProxyModelName::try_new(name.to_string()).unwrap(),
        backend_url: BackendUrl::try_new(backend_url.to_string()).unwrap(),
        backend_model_name: BackendModelName::try_new("real-model".to_string()).unwrap(),
        backend_api_key: None,
        ignore_tls_verify: false,
    }
}

fn app_with(routes: Vec<BackendRoute>) -> (Router, Arc<MemoryExchangeStore>) {
    let table = RoutingTable::new();
    table.replace(routes);
    let store = Arc::new(MemoryExchangeStore::new());
    let service = ProxyService::new(
        ProxyConfig::default(),
        table,
        Arc::clone(&store) as Arc<dyn ExchangeStore>,
    )
    .expect("service");
    (service.into_router(), store)
}

fn chat_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(CHAT_PATH)
        .header("content-type", "application/json")
        .header("authorization", "Bearer client-secret")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Wait until the recorder has moved the (single) exchange to a terminal
/// state and return it.
async fn wait_for_finalized(store: &MemoryExchangeStore) -> ProxyExchange {
    for _ in 0..200 {
        let exchanges = store
            .query_exchanges(&ExchangeFilter::default())
            .await
            .unwrap();
        if let Some(exchange) = exchanges.first() {
            if exchange.is_finalized() {
                return exchange.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("exchange never reached a terminal state");
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn buffered_exchange_is_relayed_and_recorded() {
    let mut server = mockito::Server::new_async().await;
    let backend_body = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}],
        "usage": {"total_tokens": 5}
    })
    .to_string();
    let mock = server
        .mock("POST", CHAT_PATH)
        .match_body(mockito::Matcher::PartialJson(json!({"model": "real-model"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(&backend_body)
        .create_async()
        .await;

    let (app, store) = app_with(vec![route_to(
        "gpt-x",
        &format!("{}{CHAT_PATH}", server.url()),
    )]);

    let response = app
        .oneshot(chat_request(
            r#"{"model":"gpt-x","messages":[{"role":"user","content":"hello"}]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, backend_body.as_bytes());
    mock.assert_async().await;

    let exchange = wait_for_finalized(&store).await;
    assert_eq!(exchange.status, ExchangeStatus::Completed);
    assert_eq!(exchange.status_code, Some(200));
    assert!(!exchange.is_streaming);
    // The stored request carries the substituted backend model name
    assert_eq!(exchange.request_payload["model"], "real-model");
    let reconstructed = exchange.reconstructed_response.expect("reconstructed body");
    assert_eq!(reconstructed["choices"][0]["message"]["content"], "hi");
}

#[tokio::test]
async fn authorization_header_is_redacted_in_the_transcript() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", CHAT_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[]}"#)
        .create_async()
        .await;

    let (app, store) = app_with(vec![route_to(
        "gpt-x",
        &format!("{}{CHAT_PATH}", server.url()),
    )]);
    let response = app
        .oneshot(chat_request(r#"{"model":"gpt-x","messages":[]}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let exchange = wait_for_finalized(&store).await;
    let auth = exchange
        .request_headers
        .iter()
        .find(|(name, _)| name == "authorization")
        .expect("authorization header recorded");
    assert_eq!(auth.1, "[REDACTED]");
}

#[tokio::test]
async fn unroutable_model_never_reaches_the_backend() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", CHAT_PATH)
        .expect(0)
        .create_async()
        .await;

    let (app, store) = app_with(vec![route_to(
        "gpt-x",
        &format!("{}{CHAT_PATH}", server.url()),
    )]);
    let response = app
        .oneshot(chat_request(r#"{"model":"gpt-unknown","messages":[]}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["code"], "ROUTE_NOT_FOUND");
    mock.assert_async().await;

    // Rejected before resolution: nothing recorded
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store
        .query_exchanges(&ExchangeFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn missing_model_field_is_a_client_error() {
    let (app, _store) = app_with(vec![]);
    let response = app
        .oneshot(chat_request(r#"{"messages":[]}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn streaming_exchange_relays_sse_and_stores_frames() {
    let frames = [
        r#"{"id":"c1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"}}]}"#,
        r#"{"id":"c1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"lo"}}]}"#,
        r#"{"id":"c1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
    ];
    let sse_body = format!(
        "data: {}\n\ndata: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
        frames[0], frames[1], frames[2]
    );

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", CHAT_PATH)
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(&sse_body)
        .create_async()
        .await;

    let (app, store) = app_with(vec![route_to(
        "gpt-x",
        &format!("{}{CHAT_PATH}", server.url()),
    )]);
    let response = app
        .oneshot(chat_request(
            r#"{"model":"gpt-x","messages":[],"stream":true}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    // Client sees the stream verbatim, sentinel included
    assert_eq!(body_bytes(response).await, sse_body.as_bytes());

    let exchange = wait_for_finalized(&store).await;
    assert_eq!(exchange.status, ExchangeStatus::Completed);
    assert!(exchange.is_streaming);

    // One stored chunk per data frame, in arrival order, no sentinel
    let stored: Vec<&[u8]> = exchange
        .response_chunks
        .iter()
        .map(|c| c.data.as_slice())
        .collect();
    assert_eq!(
        stored,
        frames.iter().map(|f| f.as_bytes()).collect::<Vec<_>>()
    );

    // Deltas merged into one document
    let reconstructed = exchange.reconstructed_response.expect("reconstructed");
    assert_eq!(reconstructed["object"], "chat.completion");
    assert_eq!(
        reconstructed["choices"][0]["message"]["content"],
        "Hello"
    );
    assert_eq!(reconstructed["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn unreachable_backend_fails_the_exchange() {
    // Bind then drop to get a port with no listener
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (app, store) = app_with(vec![route_to(
        "gpt-x",
        &format!("http://127.0.0.1:{port}{CHAT_PATH}"),
    )]);
    let response = app
        .oneshot(chat_request(r#"{"model":"gpt-x","messages":[]}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["code"], "BACKEND_UNREACHABLE");

    let exchange = wait_for_finalized(&store).await;
    assert_eq!(exchange.status, ExchangeStatus::Failed);
    let failure = exchange.failure.expect("failure recorded");
    assert_eq!(failure.kind, FailureKind::BackendUnreachable);
}

#[tokio::test]
async fn backend_error_status_is_relayed_verbatim_and_completed() {
    let mut server = mockito::Server::new_async().await;
    let error_body = r#"{"error":{"message":"rate limited","type":"rate_limit_error"}}"#;
    server
        .mock("POST", CHAT_PATH)
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(error_body)
        .create_async()
        .await;

    let (app, store) = app_with(vec![route_to(
        "gpt-x",
        &format!("{}{CHAT_PATH}", server.url()),
    )]);
    let response = app
        .oneshot(chat_request(r#"{"model":"gpt-x","messages":[]}"#))
        .await
        .unwrap();

    // The backend's own error passes through untouched
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_bytes(response).await, error_body.as_bytes());

    // A relayed response is a completed exchange, whatever its status
    let exchange = wait_for_finalized(&store).await;
    assert_eq!(exchange.status, ExchangeStatus::Completed);
    assert_eq!(exchange.status_code, Some(429));
}

#[tokio::test]
async fn every_response_carries_a_request_id() {
    let (app, _store) = app_with(vec![]);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}
