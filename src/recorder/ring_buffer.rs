//! Lock-free ring buffer between the request path and the recorder
//!
//! The request path serializes transcript events into this buffer and moves
//! on; the background processor drains it. When the buffer is full the
//! oldest entry is overwritten, so a slow or stalled store degrades
//! transcript completeness, never client latency.

use crate::domain::exchange::ExchangeId;
use crate::recorder::types::{DroppedEventCount, RingBufferConfig, TimestampNanos};
use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// A ring buffer entry with all data
#[derive(Clone, Debug)]
pub struct RingBufferEntry {
    pub exchange_id: ExchangeId,
    pub timestamp: TimestampNanos,
    pub data: Vec<u8>,
}

/// Statistics about ring buffer usage
#[derive(Clone, Debug, Serialize)]
pub struct RingBufferStats {
    pub total_writes: u64,
    pub total_reads: u64,
    pub dropped_events: DroppedEventCount,
}

/// Lock-free ring buffer using crossbeam's ArrayQueue with force_push
///
/// force_push gives true ring buffer semantics: writes never fail, the
/// oldest entry is overwritten when the buffer is full.
pub struct RingBuffer {
    queue: ArrayQueue<RingBufferEntry>,
    overflow_count: AtomicU64,
    successful_writes: AtomicU64,
    successful_reads: AtomicU64,
    max_data_size: usize,
}

impl RingBuffer {
    pub fn new(config: &RingBufferConfig) -> Self {
        let slot_count = *config.buffer_size.as_ref() / *config.slot_size.as_ref();
        let capacity = slot_count.next_power_of_two().max(1);

        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicU64::new(0),
            successful_writes: AtomicU64::new(0),
            successful_reads: AtomicU64::new(0),
            max_data_size: *config.slot_size.as_ref(),
        }
    }

    /// Write an event to the ring buffer
    ///
    /// Returns Ok(()) on success. If the buffer is full the oldest entry is
    /// overwritten and Err carries the running overwrite count. Data larger
    /// than the slot size is truncated.
    pub fn write(&self, exchange_id: ExchangeId, data: &[u8]) -> Result<(), u64> {
        let data_to_store = if data.len() > self.max_data_size {
            data[..self.max_data_size].to_vec()
        } else {
            data.to_vec()
        };

        let entry = RingBufferEntry {
            exchange_id,
            timestamp: TimestampNanos::from(
                chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64
            ),
            data: data_to_store,
        };

        match self.queue.force_push(entry) {
            None => {
                self.successful_writes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Some(_overwritten_entry) => {
                self.successful_writes.fetch_add(1, Ordering::Relaxed);
                let overwrite_count = self.overflow_count.fetch_add(1, Ordering::Relaxed) + 1;
                Err(overwrite_count)
            }
        }
    }

    /// Read the next available entry
    ///
    /// Returns Some((exchange_id, data)) if an event is available.
    pub fn read(&self) -> Option<(ExchangeId, Vec<u8>)> {
        match self.queue.pop() {
            Some(entry) => {
                self.successful_reads.fetch_add(1, Ordering::Relaxed);
                Some((entry.exchange_id, entry.data))
            }
            None => None,
        }
    }

    /// Get statistics about ring buffer usage
    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            total_writes: self.successful_writes.load(Ordering::Relaxed),
            total_reads: self.successful_reads.load(Ordering::Relaxed),
            dropped_events: DroppedEventCount::from(self.overflow_count.load(Ordering::Relaxed)),
        }
    }

    /// Number of times older entries were overwritten because the buffer
    /// was full
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Largest entry the buffer stores without truncating
    pub fn slot_size(&self) -> usize {
        self.max_data_size
    }
}


#[cfg(test)]
#[path = "ring_buffer_tests.rs"]
mod ring_buffer_tests;
