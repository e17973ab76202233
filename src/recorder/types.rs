//! Type definitions for the transcript recorder

use crate::domain::exchange::{ExchangeId, FailureKind};
use crate::domain::routes::{BackendModelName, BackendUrl, ProxyModelName};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ========== Size and Capacity Types ==========

/// Total buffer size for the event ring buffer in bytes
#[nutype(
    derive(Clone, Copy, Debug, Display, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |size: &usize| *size > 0 && size.is_power_of_two()),
)]
pub struct BufferSize(usize);

/// Size of individual slots in the ring buffer in bytes
#[nutype(
    derive(Clone, Copy, Debug, Display, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |size: &usize| *size > 0),
)]
pub struct SlotSize(usize);

/// Number of recorder events dropped due to buffer overflow
#[nutype(derive(Clone, Copy, Debug, Display, Deserialize, Serialize, From, AsRef))]
pub struct DroppedEventCount(u64);

/// Timestamp in nanoseconds since epoch
#[nutype(derive(Clone, Copy, Debug, Display, Deserialize, Serialize, From, AsRef))]
pub struct TimestampNanos(u64);

/// Ring buffer configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RingBufferConfig {
    /// Total buffer size in bytes
    pub buffer_size: BufferSize,
    /// Size of each slot in bytes
    pub slot_size: SlotSize,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            buffer_size: BufferSize::try_new(64 * 1024 * 1024).expect("64MB is valid power of 2"), // 64MB
            slot_size: SlotSize::try_new(256 * 1024).expect("256KB is valid"), // 256KB
        }
    }
}

// ========== Recorder Events ==========

/// Request-side context captured when an exchange begins
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangeContext {
    pub proxy_model_name: ProxyModelName,
    pub backend_model_name: BackendModelName,
    pub backend_url: BackendUrl,
    /// Body as forwarded, after model substitution
    pub request_payload: Value,
    pub request_headers: Vec<(String, String)>,
    pub is_streaming: bool,
}

/// Event emitted on the recorder tap
///
/// Serialized into the ring buffer on the request path and applied to the
/// exchange store by the background processor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub exchange_id: ExchangeId,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: TranscriptEventType,
}

/// Types of transcript events
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TranscriptEventType {
    /// Exchange accepted and forwarded; creates the pending record
    Started { context: ExchangeContext },
    /// One response chunk: an SSE data frame payload, or the whole body of
    /// a non-streaming response
    Chunk { data: Vec<u8> },
    /// Backend response fully relayed
    Completed {
        status_code: u16,
        response_headers: Vec<(String, String)>,
    },
    /// Exchange ended without a complete response
    Failed {
        kind: FailureKind,
        detail: String,
        status_code: Option<u16>,
        response_headers: Vec<(String, String)>,
    },
    /// One piece of a serialized event too large for a single buffer
    /// slot; the processor reassembles the pieces in order and applies
    /// the inner event whole
    Fragment {
        seq: u32,
        last: bool,
        data: Vec<u8>,
    },
}
