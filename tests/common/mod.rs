//! Shared helpers for consumer integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use queue_dispatch::config::DispatchConfig;
use queue_dispatch::messaging::{InMemoryBroker, ItemDescriptor};
use queue_dispatch::{AdmissionGate, ConsumerLoop, ConsumerState, LoopOutcome, Processor, ProcessorError};

/// Scripted processor that records calls and tracks how many run at once
#[derive(Default)]
pub struct MockProcessor {
    delay: Duration,
    fail_keys: HashSet<String>,
    panic_keys: HashSet<String>,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, key: &str) -> Self {
        self.fail_keys.insert(key.to_string());
        self
    }

    pub fn panicking_on(mut self, key: &str) -> Self {
        self.panic_keys.insert(key.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for MockProcessor {
    async fn encode(&self, items: Vec<ItemDescriptor>) -> Result<Vec<String>, ProcessorError> {
        let keys: Vec<String> = items.iter().map(|i| i.key.clone()).collect();
        self.calls.lock().extend(keys.iter().cloned());

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(key) = keys.iter().find(|k| self.panic_keys.contains(*k)) {
            panic!("encoder crashed on {key}");
        }
        if let Some(key) = keys.iter().find(|k| self.fail_keys.contains(*k)) {
            return Err(ProcessorError::failed(format!("cannot read {key}")));
        }
        Ok(keys.iter().map(|k| format!("encoded/{k}")).collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn config_with_concurrency(concurrency: usize) -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.admission.schedule_concurrency = concurrency;
    config
}

/// Single-item message body
pub fn body_for(key: &str) -> String {
    serde_json::json!([{ "key": key }]).to_string()
}

/// A consumer loop running against an in-memory broker
pub struct Harness {
    pub broker: InMemoryBroker,
    pub processor: Arc<MockProcessor>,
    pub gate: AdmissionGate,
    pub states: watch::Receiver<ConsumerState>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<LoopOutcome>,
}

impl Harness {
    pub fn start(processor: MockProcessor, config: DispatchConfig) -> Self {
        Self::start_with(processor, config, |_| {})
    }

    /// Start after letting `prepare` inject failures into the broker
    pub fn start_with(
        processor: MockProcessor,
        config: DispatchConfig,
        prepare: impl FnOnce(&InMemoryBroker),
    ) -> Self {
        let (broker, source) = InMemoryBroker::new(config.broker.queue_name.clone());
        prepare(&broker);

        let processor = Arc::new(processor);
        let consumer = ConsumerLoop::new(source, processor.clone(), &config)
            .expect("valid consumer configuration");
        let gate = consumer.gate().clone();
        let states = consumer.subscribe_state();

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(consumer.run(async move {
            let _ = rx.await;
        }));

        Self {
            broker,
            processor,
            gate,
            states,
            shutdown: Some(tx),
            handle,
        }
    }

    pub async fn wait_listening(&mut self) {
        tokio::time::timeout(
            Duration::from_secs(5),
            self.states.wait_for(|s| *s == ConsumerState::Listening),
        )
        .await
        .expect("consumer did not start listening")
        .expect("consumer state channel closed");
    }

    pub async fn wait_for_settlements(&self, count: usize) {
        assert!(
            self.broker
                .wait_for_settlements(count, Duration::from_secs(5))
                .await,
            "expected {count} settlements, got {:?}",
            self.broker.settlements()
        );
    }

    /// Wait until the processor has been called `count` times
    pub async fn wait_for_calls(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.processor.calls().len() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} processor calls, got {:?}",
                self.processor.calls()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Request a clean shutdown and wait for the loop to finish
    pub async fn stop(mut self) -> LoopOutcome {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.join().await
    }

    /// Wait for the loop to finish on its own
    pub async fn join(self) -> LoopOutcome {
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("consumer loop did not finish")
            .expect("consumer loop task panicked")
    }
}
