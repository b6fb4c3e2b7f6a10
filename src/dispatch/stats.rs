//! Dispatch counters for observability.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the consumer loop and all dispatcher tasks
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Deliveries pulled off the queue
    pub received: AtomicU64,
    /// Messages acknowledged
    pub acked: AtomicU64,
    /// Messages rejected, for any reason
    pub rejected: AtomicU64,
    /// Rejections caused by an undecodable body
    pub decode_failures: AtomicU64,
    /// Rejections caused by a failing or panicking processor call
    pub processor_failures: AtomicU64,
    /// Ack/reject calls the broker refused
    pub settlement_failures: AtomicU64,
    /// Messages left unsettled for the broker to redeliver
    pub abandoned: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            processor_failures: self.processor_failures.load(Ordering::Relaxed),
            settlement_failures: self.settlement_failures.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            peak_in_flight: 0,
        }
    }
}

/// Point-in-time copy of [`DispatchStats`] plus admission gate usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub received: u64,
    pub acked: u64,
    pub rejected: u64,
    pub decode_failures: u64,
    pub processor_failures: u64,
    pub settlement_failures: u64,
    pub abandoned: u64,
    /// Most messages ever processed at once
    pub peak_in_flight: usize,
}

impl DispatchStatsSnapshot {
    /// Messages that reached a final ack or reject
    pub fn settled(&self) -> u64 {
        self.acked + self.rejected
    }
}
