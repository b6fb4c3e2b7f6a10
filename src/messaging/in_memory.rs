//! # In-Memory Broker
//!
//! Channel-backed stand-in for RabbitMQ, for tests and local development.
//!
//! [`InMemoryBroker::new`] returns a publishing handle and the [`InMemorySource`]
//! the consumer loop reads from. Every ack/reject issued through a delivered
//! message is recorded on the handle, and stream or setup failures can be
//! injected to exercise the fatal paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::errors::{BrokerError, BrokerResult};
use super::message::{Acknowledger, InboundMessage};
use super::source::MessageSource;

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementKind {
    Ack,
    Reject,
}

/// One recorded settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub delivery_tag: u64,
    pub kind: SettlementKind,
}

#[derive(Debug, Default)]
struct SettlementLog {
    entries: Mutex<Vec<Settlement>>,
    changed: Notify,
    fail_settlements: AtomicBool,
}

impl SettlementLog {
    fn record(&self, delivery_tag: u64, kind: SettlementKind) -> BrokerResult<()> {
        if self.fail_settlements.load(Ordering::SeqCst) {
            return Err(match kind {
                SettlementKind::Ack => BrokerError::acknowledge(delivery_tag, "channel closed"),
                SettlementKind::Reject => BrokerError::reject(delivery_tag, "channel closed"),
            });
        }
        self.entries.lock().push(Settlement { delivery_tag, kind });
        self.changed.notify_waiters();
        Ok(())
    }
}

#[derive(Debug)]
struct InMemoryAcker {
    delivery_tag: u64,
    log: Arc<SettlementLog>,
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self) -> BrokerResult<()> {
        self.log.record(self.delivery_tag, SettlementKind::Ack)
    }

    async fn reject(&self) -> BrokerResult<()> {
        self.log.record(self.delivery_tag, SettlementKind::Reject)
    }
}

/// Publishing and inspection handle for an in-memory queue
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    sender: mpsc::UnboundedSender<BrokerResult<InboundMessage>>,
    log: Arc<SettlementLog>,
    next_tag: Arc<AtomicU64>,
    open_error: Arc<Mutex<Option<BrokerError>>>,
}

impl InMemoryBroker {
    /// Create a broker for one queue and the source that consumes it
    pub fn new(queue_name: impl Into<String>) -> (Self, InMemorySource) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let open_error = Arc::new(Mutex::new(None));
        let broker = Self {
            sender,
            log: Arc::new(SettlementLog::default()),
            next_tag: Arc::new(AtomicU64::new(1)),
            open_error: open_error.clone(),
        };
        let source = InMemorySource {
            queue_name: queue_name.into(),
            receiver,
            open_error,
            closed: false,
        };
        (broker, source)
    }

    /// Publish a message body; returns its delivery tag
    pub fn publish(&self, body: impl Into<Vec<u8>>) -> u64 {
        self.deliver(body.into(), false)
    }

    /// Publish a message flagged as a redelivery
    pub fn publish_redelivered(&self, body: impl Into<Vec<u8>>) -> u64 {
        self.deliver(body.into(), true)
    }

    fn deliver(&self, body: Vec<u8>, redelivered: bool) -> u64 {
        let delivery_tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let acker = InMemoryAcker {
            delivery_tag,
            log: self.log.clone(),
        };
        let message = InboundMessage::new(delivery_tag, redelivered, body, acker);
        // A send error means the consumer is gone; the returned message is dropped unsettled.
        let _ = self.sender.send(Ok(message));
        delivery_tag
    }

    /// Make the delivery stream yield an iteration error
    pub fn fail_stream(&self, error: BrokerError) {
        let _ = self.sender.send(Err(error));
    }

    /// Make the next `open` fail
    pub fn fail_open(&self, error: BrokerError) {
        *self.open_error.lock() = Some(error);
    }

    /// Make every subsequent ack/reject call fail
    pub fn fail_settlements(&self, fail: bool) {
        self.log.fail_settlements.store(fail, Ordering::SeqCst);
    }

    /// All settlements so far, in the order they happened
    pub fn settlements(&self) -> Vec<Settlement> {
        self.log.entries.lock().clone()
    }

    pub fn acks_for(&self, delivery_tag: u64) -> usize {
        self.count(delivery_tag, SettlementKind::Ack)
    }

    pub fn rejects_for(&self, delivery_tag: u64) -> usize {
        self.count(delivery_tag, SettlementKind::Reject)
    }

    fn count(&self, delivery_tag: u64, kind: SettlementKind) -> usize {
        self.log
            .entries
            .lock()
            .iter()
            .filter(|s| s.delivery_tag == delivery_tag && s.kind == kind)
            .count()
    }

    /// Wait until at least `count` settlements have been recorded
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_settlements(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let changed = self.log.changed.notified();
                if self.log.entries.lock().len() >= count {
                    return;
                }
                changed.await;
            }
        })
        .await
        .is_ok()
    }
}

/// Consumer side of an [`InMemoryBroker`]
///
/// The stream ends once every broker handle is dropped or the source is closed.
#[derive(Debug)]
pub struct InMemorySource {
    queue_name: String,
    receiver: mpsc::UnboundedReceiver<BrokerResult<InboundMessage>>,
    open_error: Arc<Mutex<Option<BrokerError>>>,
    closed: bool,
}

#[async_trait]
impl MessageSource for InMemorySource {
    async fn open(&mut self) -> BrokerResult<()> {
        match self.open_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn next_message(&mut self) -> Option<BrokerResult<InboundMessage>> {
        if self.closed {
            return None;
        }
        self.receiver.recv().await
    }

    async fn close(&mut self) -> BrokerResult<()> {
        self.closed = true;
        self.receiver.close();
        Ok(())
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }
}
