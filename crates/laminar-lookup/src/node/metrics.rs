//! Lock-free lookup node metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Per-node metrics using atomics (no locks on the data path except the
/// last exception text).
#[derive(Debug, Default)]
pub struct LookupNodeMetrics {
    /// Input items received (rows, windows, invalid items).
    pub records_in: AtomicU64,
    /// Batches emitted.
    pub records_out: AtomicU64,
    /// Join tuples emitted across all batches.
    pub messages_processed: AtomicU64,
    /// Errors emitted (per-item failures and forwarded upstream errors).
    pub exceptions: AtomicU64,
    /// Processing latency of the last item in nanoseconds.
    pub last_process_ns: AtomicU64,
    /// Input items waiting in the channel when the last item finished.
    pub buffer_length: AtomicU64,
    last_exception: Mutex<Option<String>>,
}

impl LookupNodeMetrics {
    /// Records a received input item.
    pub fn record_in(&self) {
        self.records_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an emitted batch of `messages` join tuples.
    pub fn record_out(&self, messages: u64) {
        self.records_out.fetch_add(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(messages, Ordering::Relaxed);
    }

    /// Records an emitted error.
    pub fn record_exception(&self, message: String) {
        self.exceptions.fetch_add(1, Ordering::Relaxed);
        *self.last_exception.lock() = Some(message);
    }

    /// Records the end of processing one item.
    pub fn record_process(&self, latency_ns: u64, buffer_length: u64) {
        self.last_process_ns.store(latency_ns, Ordering::Relaxed);
        self.buffer_length.store(buffer_length, Ordering::Relaxed);
    }

    /// Message of the last recorded exception.
    #[must_use]
    pub fn last_exception(&self) -> Option<String> {
        self.last_exception.lock().clone()
    }

    /// Returns a snapshot of the current metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_in: self.records_in.load(Ordering::Relaxed),
            records_out: self.records_out.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            last_process_ns: self.last_process_ns.load(Ordering::Relaxed),
            buffer_length: self.buffer_length.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of lookup node metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Input items received.
    pub records_in: u64,
    /// Batches emitted.
    pub records_out: u64,
    /// Join tuples emitted.
    pub messages_processed: u64,
    /// Errors emitted.
    pub exceptions: u64,
    /// Last processing latency in nanoseconds.
    pub last_process_ns: u64,
    /// Input backlog after the last item.
    pub buffer_length: u64,
}
