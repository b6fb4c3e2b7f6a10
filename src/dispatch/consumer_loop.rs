//! # Consumer Loop
//!
//! Pulls deliveries off a [`MessageSource`] one at a time and spawns a
//! [`Dispatcher`] task for each without waiting on it.
//!
//! ## States
//!
//! ```text
//! Disconnected → Connecting → Listening ─┬─ shutdown / intake ended → Draining → Stopped   (exit 0)
//!                    │                   └─ iteration error ────────→ Terminating         (exit 1)
//!                    └─ setup error ───────────────────────────────→ Terminating         (exit 1)
//! ```
//!
//! Failures of individual messages stay inside their dispatcher task. A failure
//! of the delivery stream itself, one the source could not heal by
//! reconnecting, ends the loop. In-flight tasks are aborted on that path; their
//! messages stay unacknowledged and the broker redelivers them to the next
//! process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::stats::{DispatchStats, DispatchStatsSnapshot};
use crate::admission::AdmissionGate;
use crate::config::{ConfigError, DispatchConfig};
use crate::error::{ExitStatus, ServiceError, ServiceResult};
use crate::messaging::{BrokerError, InboundMessage, MessageSource};
use crate::processor::Processor;

/// Lifecycle of a [`ConsumerLoop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Listening,
    /// Intake stopped, waiting for in-flight messages
    Draining,
    /// Fatal error, shutting down
    Terminating,
    Stopped,
}

impl std::fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Draining => "draining",
            Self::Terminating => "terminating",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How [`ConsumerLoop::run`] ended
#[derive(Debug)]
pub enum LoopOutcome {
    /// Shutdown was requested or intake ended, and in-flight work drained
    Stopped { stats: DispatchStatsSnapshot },
    /// The loop hit an error it cannot recover from
    Failed {
        error: ServiceError,
        stats: DispatchStatsSnapshot,
    },
}

impl LoopOutcome {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Stopped { .. } => ExitStatus::Clean,
            Self::Failed { error, .. } => error.exit_status(),
        }
    }

    pub fn stats(&self) -> &DispatchStatsSnapshot {
        match self {
            Self::Stopped { stats } | Self::Failed { stats, .. } => stats,
        }
    }

    pub fn error(&self) -> Option<&ServiceError> {
        match self {
            Self::Stopped { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }
}

enum LoopEvent {
    Delivery(InboundMessage),
    StreamFailed(BrokerError),
    IntakeEnded,
    Shutdown,
}

/// Queue consumer that spawns one dispatcher task per delivery
pub struct ConsumerLoop<S: MessageSource, P: Processor> {
    source: S,
    dispatcher: Dispatcher<P>,
    gate: AdmissionGate,
    stats: Arc<DispatchStats>,
    drain_timeout: Option<Duration>,
    state: watch::Sender<ConsumerState>,
}

impl<S: MessageSource, P: Processor> std::fmt::Debug for ConsumerLoop<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerLoop")
            .field("queue", &self.source.queue_name())
            .field("state", &*self.state.borrow())
            .field("gate", &self.gate)
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

impl<S: MessageSource, P: Processor> ConsumerLoop<S, P> {
    pub fn new(source: S, processor: Arc<P>, config: &DispatchConfig) -> ServiceResult<Self> {
        let gate = AdmissionGate::new(config.admission.schedule_concurrency).map_err(|e| {
            ConfigError::invalid("admission.schedule_concurrency", e.to_string())
        })?;
        let stats = Arc::new(DispatchStats::new());
        let dispatcher = Dispatcher::new(processor, gate.clone(), stats.clone());
        let (state, _) = watch::channel(ConsumerState::Disconnected);

        Ok(Self {
            source,
            dispatcher,
            gate,
            stats,
            drain_timeout: config.shutdown.drain_timeout(),
            state,
        })
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Consume until `shutdown` resolves or the delivery stream fails
    pub async fn run<F>(mut self, shutdown: F) -> LoopOutcome
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut tasks: JoinSet<DispatchOutcome> = JoinSet::new();

        self.set_state(ConsumerState::Connecting);
        info!(
            queue = %self.source.queue_name(),
            schedule_concurrency = self.gate.capacity(),
            "Starting consumer"
        );

        let opened = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            result = self.source.open() => Some(result),
        };
        match opened {
            None => {
                info!("Shutdown requested before the consumer started");
                return self.drain_and_stop(tasks).await;
            }
            Some(Err(e)) => return self.fail(e.into(), tasks).await,
            Some(Ok(())) => {}
        }

        self.set_state(ConsumerState::Listening);
        info!(queue = %self.source.queue_name(), "Listening for messages");

        loop {
            while let Some(joined) = tasks.try_join_next() {
                reap(&self.stats, joined);
            }

            let event = tokio::select! {
                biased;
                _ = &mut shutdown => LoopEvent::Shutdown,
                next = self.source.next_message() => match next {
                    Some(Ok(message)) => LoopEvent::Delivery(message),
                    Some(Err(e)) => LoopEvent::StreamFailed(e),
                    None => LoopEvent::IntakeEnded,
                },
            };

            match event {
                LoopEvent::Delivery(message) => {
                    DispatchStats::incr(&self.stats.received);
                    debug!(
                        delivery_tag = message.delivery_tag(),
                        in_flight = tasks.len(),
                        "Received message"
                    );
                    let dispatcher = self.dispatcher.clone();
                    tasks.spawn(async move { dispatcher.dispatch(message).await });
                }
                LoopEvent::Shutdown => {
                    info!(in_flight = tasks.len(), "Shutdown requested, stopping intake");
                    if let Err(e) = self.source.close().await {
                        warn!(error = %e, "Failed to cancel consumer cleanly");
                    }
                    return self.drain_and_stop(tasks).await;
                }
                LoopEvent::IntakeEnded => {
                    info!(in_flight = tasks.len(), "Delivery stream ended");
                    return self.drain_and_stop(tasks).await;
                }
                LoopEvent::StreamFailed(e) => return self.fail(e.into(), tasks).await,
            }
        }
    }

    async fn drain_and_stop(mut self, mut tasks: JoinSet<DispatchOutcome>) -> LoopOutcome {
        self.set_state(ConsumerState::Draining);
        info!(
            in_flight = tasks.len(),
            drain_timeout_ms = self.drain_timeout.map(|d| d.as_millis() as u64),
            "Draining in-flight messages"
        );

        let drained = match self.drain_timeout {
            Some(limit) => tokio::time::timeout(limit, join_all(&self.stats, &mut tasks))
                .await
                .is_ok(),
            None => {
                join_all(&self.stats, &mut tasks).await;
                true
            }
        };

        if !drained {
            warn!(
                remaining = tasks.len(),
                "Drain timeout elapsed, leaving remaining messages for redelivery"
            );
            abort_all(&self.gate, &self.stats, &mut tasks).await;
        }

        if let Err(e) = self.source.disconnect().await {
            warn!(error = %e, "Failed to disconnect cleanly");
        }

        self.set_state(ConsumerState::Stopped);
        let stats = self.snapshot();
        info!(
            received = stats.received,
            acked = stats.acked,
            rejected = stats.rejected,
            decode_failures = stats.decode_failures,
            processor_failures = stats.processor_failures,
            settlement_failures = stats.settlement_failures,
            abandoned = stats.abandoned,
            peak_in_flight = stats.peak_in_flight,
            "Consumer stopped"
        );
        LoopOutcome::Stopped { stats }
    }

    async fn fail(mut self, error: ServiceError, mut tasks: JoinSet<DispatchOutcome>) -> LoopOutcome {
        self.set_state(ConsumerState::Terminating);
        error!(
            queue = %self.source.queue_name(),
            in_flight = tasks.len(),
            error = %error,
            "Consumer loop failed, terminating"
        );

        abort_all(&self.gate, &self.stats, &mut tasks).await;
        if let Err(e) = self.source.disconnect().await {
            debug!(error = %e, "Disconnect after failure also failed");
        }

        let stats = self.snapshot();
        LoopOutcome::Failed { error, stats }
    }

    fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            peak_in_flight: self.gate.peak_in_flight(),
            ..self.stats.snapshot()
        }
    }

    fn set_state(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        debug!(from = %previous, to = %next, "Consumer state changed");
    }
}

async fn join_all(stats: &DispatchStats, tasks: &mut JoinSet<DispatchOutcome>) {
    while let Some(joined) = tasks.join_next().await {
        reap(stats, joined);
    }
}

/// Stop admitting work and cancel every in-flight task
async fn abort_all(gate: &AdmissionGate, stats: &DispatchStats, tasks: &mut JoinSet<DispatchOutcome>) {
    gate.close();
    tasks.abort_all();
    join_all(stats, tasks).await;
}

fn reap(stats: &DispatchStats, joined: Result<DispatchOutcome, JoinError>) {
    match joined {
        Ok(outcome) => debug!(acked = outcome.is_acked(), "Dispatcher task finished"),
        Err(e) if e.is_cancelled() => DispatchStats::incr(&stats.abandoned),
        Err(e) => error!(error = %e, "Dispatcher task failed"),
    }
}
