//! # Admission Gate
//!
//! Process-wide bound on how many messages are processed at once.
//!
//! Every dispatcher task acquires an [`AdmissionPermit`] before it does any work
//! and holds it until the message has been acked or rejected. The permit is
//! returned when it is dropped, so early returns, errors and panics all release it.
//!
//! ```rust
//! use queue_dispatch::AdmissionGate;
//!
//! # tokio_test::block_on(async {
//! let gate = AdmissionGate::new(2).unwrap();
//! let first = gate.acquire().await.unwrap();
//! let _second = gate.acquire().await.unwrap();
//! assert_eq!(gate.available(), 0);
//!
//! drop(first);
//! assert_eq!(gate.available(), 1);
//! # });
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Admission gate errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("Admission gate capacity must be at least 1")]
    ZeroCapacity,

    #[error("Admission gate is closed")]
    Closed,
}

#[derive(Debug)]
struct GateCounters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Counting semaphore shared by all dispatcher tasks
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    counters: Arc<GateCounters>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Result<Self, GateError> {
        if capacity == 0 {
            return Err(GateError::ZeroCapacity);
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            counters: Arc::new(GateCounters {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
            capacity,
        })
    }

    /// Wait for a free slot
    ///
    /// Waiters are served in FIFO order. Fails only once the gate is closed.
    pub async fn acquire(&self) -> Result<AdmissionPermit, GateError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateError::Closed)?;

        let in_flight = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(in_flight, Ordering::SeqCst);

        Ok(AdmissionPermit {
            _permit: permit,
            counters: self.counters.clone(),
        })
    }

    /// Permits currently held
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits ever held at once
    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits free right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Close the gate; pending and future `acquire` calls fail
    ///
    /// Permits already held stay valid until dropped.
    pub fn close(&self) {
        debug!(in_flight = self.in_flight(), "Closing admission gate");
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

/// One admitted message; the slot is released on drop
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<GateCounters>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
