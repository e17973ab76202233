//! Exchange persistence
//!
//! `ExchangeStore` is written to exclusively by the transcript processor
//! and read by log-viewing collaborators. Chunk appends are write-ahead:
//! each chunk lands in the store when processed, not buffered until the
//! exchange ends. Finalization happens exactly once per exchange; a second
//! attempt is an `AlreadyFinalized` error the processor logs loudly.

use crate::domain::exchange::{
    ExchangeChunk, ExchangeFailure, ExchangeId, ExchangeStatus, FailureKind, ProxyExchange,
};
use crate::domain::routes::ProxyModelName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Rows returned by a query when no explicit limit is given
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

#[derive(Debug, Error)]
pub enum ExchangeStoreError {
    #[error("Exchange '{0}' not found")]
    NotFound(ExchangeId),
    #[error("Exchange '{0}' is already finalized")]
    AlreadyFinalized(ExchangeId),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, ExchangeStoreError>;

/// Terminal state applied to a pending exchange
#[derive(Debug, Clone)]
pub enum ExchangeOutcome {
    Completed {
        status_code: u16,
        response_headers: Vec<(String, String)>,
        /// Absent only when reconstruction was impossible, e.g. the start
        /// of the exchange was lost to ring-buffer overflow
        reconstructed_response: Option<Value>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        kind: FailureKind,
        detail: String,
        status_code: Option<u16>,
        response_headers: Vec<(String, String)>,
        completed_at: DateTime<Utc>,
    },
}

/// Query filter for stored exchanges
///
/// Time bounds are inclusive. Results are ordered newest first.
#[derive(Debug, Clone, Default)]
pub struct ExchangeFilter {
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub status: Option<ExchangeStatus>,
    pub proxy_model_name: Option<ProxyModelName>,
    pub is_streaming: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Storage backend for recorded exchanges
#[async_trait]
pub trait ExchangeStore: Send + Sync {
    /// Create a pending exchange record
    async fn create_exchange(&self, exchange: ProxyExchange) -> Result<()>;

    /// Append one response chunk; returns the assigned sequence number
    async fn append_chunk(
        &self,
        id: ExchangeId,
        data: Vec<u8>,
        received_at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Move a pending exchange to its terminal state, exactly once
    async fn finalize(&self, id: ExchangeId, outcome: ExchangeOutcome) -> Result<()>;

    /// Fetch one exchange with its chunks
    async fn get_exchange(&self, id: ExchangeId) -> Result<Option<ProxyExchange>>;

    /// Query exchanges, newest first
    async fn query_exchanges(&self, filter: &ExchangeFilter) -> Result<Vec<ProxyExchange>>;
}

fn apply_outcome(exchange: &mut ProxyExchange, outcome: ExchangeOutcome) {
    match outcome {
        ExchangeOutcome::Completed {
            status_code,
            response_headers,
            reconstructed_response,
            completed_at,
        } => {
            exchange.status = ExchangeStatus::Completed;
            exchange.status_code = Some(status_code);
            exchange.response_headers = response_headers;
            exchange.reconstructed_response = reconstructed_response;
            exchange.completed_at = Some(completed_at);
        }
        ExchangeOutcome::Failed {
            kind,
            detail,
            status_code,
            response_headers,
            completed_at,
        } => {
            exchange.status = ExchangeStatus::Failed;
            exchange.status_code = status_code;
            exchange.response_headers = response_headers;
            exchange.failure = Some(ExchangeFailure { kind, detail });
            exchange.completed_at = Some(completed_at);
        }
    }
}

fn matches_filter(exchange: &ProxyExchange, filter: &ExchangeFilter) -> bool {
    if let Some(after) = filter.started_after {
        if exchange.started_at < after {
            return false;
        }
    }
    if let Some(before) = filter.started_before {
        if exchange.started_at > before {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if exchange.status != status {
            return false;
        }
    }
    if let Some(ref name) = filter.proxy_model_name {
        if &exchange.proxy_model_name != name {
            return false;
        }
    }
    if let Some(is_streaming) = filter.is_streaming {
        if exchange.is_streaming != is_streaming {
            return false;
        }
    }
    true
}

/// In-memory exchange store, the default backend
#[derive(Clone, Default)]
pub struct MemoryExchangeStore {
    exchanges: Arc<RwLock<HashMap<ExchangeId, ProxyExchange>>>,
}

impl MemoryExchangeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExchangeStore for MemoryExchangeStore {
    async fn create_exchange(&self, exchange: ProxyExchange) -> Result<()> {
        let mut exchanges = self.exchanges.write();
        if exchanges.contains_key(&exchange.id) {
            return Err(ExchangeStoreError::Storage(format!(
                "exchange '{}' already exists",
                exchange.id
            )));
        }
        exchanges.insert(exchange.id, exchange);
        Ok(())
    }

    async fn append_chunk(
        &self,
        id: ExchangeId,
        data: Vec<u8>,
        received_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut exchanges = self.exchanges.write();
        let exchange = exchanges
            .get_mut(&id)
            .ok_or(ExchangeStoreError::NotFound(id))?;
        if exchange.is_finalized() {
            return Err(ExchangeStoreError::AlreadyFinalized(id));
        }

        let seq = exchange.response_chunks.len() as u64;
        exchange.response_chunks.push(ExchangeChunk {
            seq,
            data,
            received_at,
        });
        Ok(seq)
    }

    async fn finalize(&self, id: ExchangeId, outcome: ExchangeOutcome) -> Result<()> {
        let mut exchanges = self.exchanges.write();
        let exchange = exchanges
            .get_mut(&id)
            .ok_or(ExchangeStoreError::NotFound(id))?;
        if exchange.is_finalized() {
            return Err(ExchangeStoreError::AlreadyFinalized(id));
        }

        apply_outcome(exchange, outcome);
        Ok(())
    }

    async fn get_exchange(&self, id: ExchangeId) -> Result<Option<ProxyExchange>> {
        Ok(self.exchanges.read().get(&id).cloned())
    }

    async fn query_exchanges(&self, filter: &ExchangeFilter) -> Result<Vec<ProxyExchange>> {
        let exchanges = self.exchanges.read();
        let mut matching: Vec<ProxyExchange> = exchanges
            .values()
            .filter(|e| matches_filter(e, filter))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.id.as_ref().cmp(a.id.as_ref()))
        });

        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT) as usize;
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::routes::{BackendModelName, BackendUrl};
    use chrono::Duration;

    fn pending(model: &str, is_streaming: bool, started_at: DateTime<Utc>) -> ProxyExchange {
        ProxyExchange::pending(
            ExchangeId::new(),
            ProxyModelName::try_new(model.to_string()).unwrap(),
            BackendModelName::try_new("backend-model".to_string()).unwrap(),
            BackendUrl::try_new("http://backend/v1/chat/completions".to_string()).unwrap(),
            serde_json::json!({"model": "backend-model"}),
            vec![],
            is_streaming,
            started_at,
        )
    }

    fn completed_outcome() -> ExchangeOutcome {
        ExchangeOutcome::Completed {
            status_code: 200,
            response_headers: vec![("content-type".to_string(), "application/json".to_string())],
            reconstructed_response: Some(serde_json::json!({"choices": []})),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let store = MemoryExchangeStore::new();
        let exchange = pending("gpt-x", false, Utc::now());
        let id = exchange.id;

        store.create_exchange(exchange.clone()).await.unwrap();
        let fetched = store.get_exchange(id).await.unwrap().unwrap();
        assert_eq!(fetched, exchange);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let store = MemoryExchangeStore::new();
        let exchange = pending("gpt-x", false, Utc::now());

        store.create_exchange(exchange.clone()).await.unwrap();
        let err = store.create_exchange(exchange).await.unwrap_err();
        assert!(matches!(err, ExchangeStoreError::Storage(_)));
    }

    #[tokio::test]
    async fn test_chunks_append_in_order_with_sequential_seq() {
        let store = MemoryExchangeStore::new();
        let exchange = pending("gpt-x", true, Utc::now());
        let id = exchange.id;
        store.create_exchange(exchange).await.unwrap();

        for (i, payload) in [b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]
            .into_iter()
            .enumerate()
        {
            let seq = store.append_chunk(id, payload, Utc::now()).await.unwrap();
            assert_eq!(seq, i as u64);
        }

        let stored = store.get_exchange(id).await.unwrap().unwrap();
        let datas: Vec<&[u8]> = stored
            .response_chunks
            .iter()
            .map(|c| c.data.as_slice())
            .collect();
        assert_eq!(datas, vec![b"A".as_slice(), b"B", b"C"]);
    }

    #[tokio::test]
    async fn test_append_to_missing_exchange_is_not_found() {
        let store = MemoryExchangeStore::new();
        let err = store
            .append_chunk(ExchangeId::new(), b"A".to_vec(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_finalize_completed_fills_terminal_fields() {
        let store = MemoryExchangeStore::new();
        let exchange = pending("gpt-x", false, Utc::now());
        let id = exchange.id;
        store.create_exchange(exchange).await.unwrap();

        store.finalize(id, completed_outcome()).await.unwrap();

        let stored = store.get_exchange(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExchangeStatus::Completed);
        assert_eq!(stored.status_code, Some(200));
        assert!(stored.reconstructed_response.is_some());
        assert!(stored.completed_at.is_some());
        assert!(stored.failure.is_none());
    }

    #[tokio::test]
    async fn test_finalize_failed_records_failure() {
        let store = MemoryExchangeStore::new();
        let exchange = pending("gpt-x", true, Utc::now());
        let id = exchange.id;
        store.create_exchange(exchange).await.unwrap();

        store
            .finalize(
                id,
                ExchangeOutcome::Failed {
                    kind: FailureKind::ClientAborted,
                    detail: "client disconnected during relay".to_string(),
                    status_code: Some(200),
                    response_headers: vec![],
                    completed_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let stored = store.get_exchange(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExchangeStatus::Failed);
        let failure = stored.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::ClientAborted);
        assert!(stored.reconstructed_response.is_none());
    }

    #[tokio::test]
    async fn test_second_finalize_is_rejected_and_changes_nothing() {
        let store = MemoryExchangeStore::new();
        let exchange = pending("gpt-x", false, Utc::now());
        let id = exchange.id;
        store.create_exchange(exchange).await.unwrap();

        store.finalize(id, completed_outcome()).await.unwrap();
        let err = store
            .finalize(
                id,
                ExchangeOutcome::Failed {
                    kind: FailureKind::BackendProtocol,
                    detail: "late failure".to_string(),
                    status_code: None,
                    response_headers: vec![],
                    completed_at: Utc::now(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeStoreError::AlreadyFinalized(_)));
        let stored = store.get_exchange(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExchangeStatus::Completed);
        assert!(stored.failure.is_none());
    }

    #[tokio::test]
    async fn test_append_after_finalize_is_rejected() {
        let store = MemoryExchangeStore::new();
        let exchange = pending("gpt-x", true, Utc::now());
        let id = exchange.id;
        store.create_exchange(exchange).await.unwrap();
        store.finalize(id, completed_outcome()).await.unwrap();

        let err = store
            .append_chunk(id, b"late".to_vec(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeStoreError::AlreadyFinalized(_)));
    }

    #[tokio::test]
    async fn test_query_filters_and_orders_newest_first() {
        let store = MemoryExchangeStore::new();
        let base = Utc::now();

        let old_streaming = pending("gpt-x", true, base - Duration::minutes(10));
        let recent_buffered = pending("gpt-x", false, base - Duration::minutes(5));
        let recent_other_model = pending("gpt-y", true, base - Duration::minutes(1));

        for e in [&old_streaming, &recent_buffered, &recent_other_model] {
            store.create_exchange(e.clone()).await.unwrap();
        }

        // Model filter
        let gpt_x = ExchangeFilter {
            proxy_model_name: Some(ProxyModelName::try_new("gpt-x".to_string()).unwrap()),
            ..Default::default()
        };
        let results = store.query_exchanges(&gpt_x).await.unwrap();
        assert_eq!(results.len(), 2);
        // Newest first
        assert_eq!(results[0].id, recent_buffered.id);
        assert_eq!(results[1].id, old_streaming.id);

        // Streaming filter
        let streaming_only = ExchangeFilter {
            is_streaming: Some(true),
            ..Default::default()
        };
        assert_eq!(store.query_exchanges(&streaming_only).await.unwrap().len(), 2);

        // Time range excludes the oldest
        let recent = ExchangeFilter {
            started_after: Some(base - Duration::minutes(6)),
            ..Default::default()
        };
        assert_eq!(store.query_exchanges(&recent).await.unwrap().len(), 2);

        // Status filter sees everything still pending
        let pending_only = ExchangeFilter {
            status: Some(ExchangeStatus::Pending),
            ..Default::default()
        };
        assert_eq!(store.query_exchanges(&pending_only).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_query_limit_and_offset_paginate() {
        let store = MemoryExchangeStore::new();
        let base = Utc::now();
        for i in 0..5i64 {
            store
                .create_exchange(pending("gpt-x", false, base - Duration::minutes(i)))
                .await
                .unwrap();
        }

        let first_page = store
            .query_exchanges(&ExchangeFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        let second_page = store
            .query_exchanges(&ExchangeFilter {
                limit: Some(2),
                offset: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(first_page.len(), 2);
        assert_eq!(second_page.len(), 2);
        assert!(first_page[1].started_at > second_page[0].started_at);
    }
}
