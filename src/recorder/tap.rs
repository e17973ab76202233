//! Recorder tap for the request path
//!
//! The forwarding side reports exchange progress through `ExchangeTap`.
//! Every method serializes one event into the ring buffer and returns
//! immediately; nothing here waits on storage.

use crate::domain::exchange::{ExchangeId, FailureKind};
use crate::recorder::ring_buffer::RingBuffer;
use crate::recorder::types::{ExchangeContext, TranscriptEvent, TranscriptEventType};
use std::sync::Arc;

/// Placeholder stored instead of an Authorization value
pub const REDACTED_VALUE: &str = "[REDACTED]";

/// Headroom per fragment for the event envelope around the payload
const FRAGMENT_ENVELOPE_BYTES: usize = 160;

/// Emits transcript events from the request path
#[derive(Clone)]
pub struct ExchangeTap {
    ring_buffer: Arc<RingBuffer>,
}

impl ExchangeTap {
    pub fn new(ring_buffer: Arc<RingBuffer>) -> Self {
        Self { ring_buffer }
    }

    /// Report that an exchange was accepted and is being forwarded
    pub fn exchange_started(&self, exchange_id: ExchangeId, context: ExchangeContext) {
        self.write_event(exchange_id, TranscriptEventType::Started { context });
    }

    /// Report one response chunk, in backend arrival order
    pub fn chunk_received(&self, exchange_id: ExchangeId, data: Vec<u8>) {
        self.write_event(exchange_id, TranscriptEventType::Chunk { data });
    }

    /// Report that the backend response was fully relayed
    pub fn exchange_completed(
        &self,
        exchange_id: ExchangeId,
        status_code: u16,
        response_headers: Vec<(String, String)>,
    ) {
        self.write_event(
            exchange_id,
            TranscriptEventType::Completed {
                status_code,
                response_headers,
            },
        );
    }

    /// Report that the exchange ended without a complete response
    pub fn exchange_failed(
        &self,
        exchange_id: ExchangeId,
        kind: FailureKind,
        detail: impl Into<String>,
        status_code: Option<u16>,
        response_headers: Vec<(String, String)>,
    ) {
        self.write_event(
            exchange_id,
            TranscriptEventType::Failed {
                kind,
                detail: detail.into(),
                status_code,
                response_headers,
            },
        );
    }

    /// Write a transcript event to the ring buffer
    ///
    /// Events that fit in one buffer slot are written whole; larger
    /// events (a big request payload, an oversized response body) are
    /// split into fragment events so nothing is truncated.
    fn write_event(&self, exchange_id: ExchangeId, event_type: TranscriptEventType) {
        let event = TranscriptEvent {
            exchange_id,
            timestamp: chrono::Utc::now(),
            event_type,
        };

        // Fire-and-forget write to ring buffer
        if let Ok(serialized) = serde_json::to_vec(&event) {
            if serialized.len() <= self.ring_buffer.slot_size() {
                let _ = self.ring_buffer.write(exchange_id, &serialized);
            } else {
                self.write_fragmented(exchange_id, &serialized);
            }
        }
    }

    /// Split a serialized event into fragments that each fit one slot
    ///
    /// JSON encodes a payload byte in up to four characters, so the raw
    /// budget per fragment leaves that margin plus envelope headroom.
    fn write_fragmented(&self, exchange_id: ExchangeId, serialized: &[u8]) {
        let budget = (self
            .ring_buffer
            .slot_size()
            .saturating_sub(FRAGMENT_ENVELOPE_BYTES)
            / 4)
        .max(1);
        let last_seq = serialized.len().div_ceil(budget) - 1;

        for (seq, part) in serialized.chunks(budget).enumerate() {
            let fragment = TranscriptEvent {
                exchange_id,
                timestamp: chrono::Utc::now(),
                event_type: TranscriptEventType::Fragment {
                    seq: seq as u32,
                    last: seq == last_seq,
                    data: part.to_vec(),
                },
            };
            if let Ok(bytes) = serde_json::to_vec(&fragment) {
                let _ = self.ring_buffer.write(exchange_id, &bytes);
            }
        }
    }
}

/// Extract headers from an HTTP header map into recordable pairs
pub fn headers_vec(headers: &http::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("<binary>").to_string()))
        .collect()
}

/// Replace Authorization values so credentials never reach storage
pub fn redact_authorization(headers: &mut [(String, String)]) {
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("authorization") {
            *value = REDACTED_VALUE.to_string();
        }
    }
}
