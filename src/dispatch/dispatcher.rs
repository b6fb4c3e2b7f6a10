//! # Dispatcher
//!
//! Handles one delivered message end to end:
//!
//! ```text
//! acquire permit → decode body → encode every item concurrently → ack | reject → release permit
//! ```
//!
//! Every failure inside this pipeline is contained here and turned into a
//! reject. Nothing a single message does can reach the consumer loop.
//!
//! ## Fan-out
//!
//! Each descriptor goes to the processor as its own single-element batch and
//! all calls run concurrently. The decision waits for every call to settle, so
//! one failing item never abandons the others mid-flight. A panicking call is
//! caught and counts as a failure.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::stats::DispatchStats;
use crate::admission::AdmissionGate;
use crate::logging::body_preview;
use crate::messaging::{BrokerError, DecodeError, InboundMessage, ItemDescriptor};
use crate::processor::{Processor, ProcessorError};

/// Longest body excerpt written to the log per decision
const BODY_PREVIEW_LIMIT: usize = 1024;

/// Why a message was not acknowledged
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Failed to decode message body: {0}")]
    Decode(#[from] DecodeError),

    #[error("Message contains no items")]
    EmptyBatch,

    #[error("Processing '{key}' failed: {source}")]
    Processor {
        key: String,
        #[source]
        source: ProcessorError,
    },

    #[error("Processing '{key}' panicked: {message}")]
    Panicked { key: String, message: String },

    #[error("Admission gate closed before the message was admitted")]
    GateClosed,

    #[error("Failed to settle message: {0}")]
    Settlement(BrokerError),
}

/// How a dispatched message ended
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Every item succeeded and the message was acknowledged
    Acked { outputs: Vec<String> },
    /// The message was rejected because of `error`
    Rejected { error: DispatchError },
    /// Neither ack nor reject reached the broker; it will redeliver
    Unsettled { error: DispatchError },
}

impl DispatchOutcome {
    pub fn is_acked(&self) -> bool {
        matches!(self, Self::Acked { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Per-message dispatch pipeline, cloned into every spawned task
pub struct Dispatcher<P: Processor> {
    processor: Arc<P>,
    gate: AdmissionGate,
    stats: Arc<DispatchStats>,
}

impl<P: Processor> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
            gate: self.gate.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<P: Processor> std::fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("processor", &self.processor.name())
            .field("gate", &self.gate)
            .finish()
    }
}

impl<P: Processor> Dispatcher<P> {
    pub fn new(processor: Arc<P>, gate: AdmissionGate, stats: Arc<DispatchStats>) -> Self {
        Self {
            processor,
            gate,
            stats,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    /// Process one message and settle it
    ///
    /// The admission permit brackets the whole body, including decoding and
    /// the ack/reject call, and is released on every path.
    pub async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        let delivery_tag = message.delivery_tag();

        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    delivery_tag = delivery_tag,
                    "Admission gate closed - leaving message for redelivery"
                );
                DispatchStats::incr(&self.stats.abandoned);
                return DispatchOutcome::Unsettled {
                    error: DispatchError::GateClosed,
                };
            }
        };

        debug!(
            delivery_tag = delivery_tag,
            redelivered = message.redelivered(),
            in_flight = self.gate.in_flight(),
            "Admitted message"
        );

        match self.process(&message).await {
            Ok(outputs) => self.acknowledge(message, outputs).await,
            Err(error) => self.reject(message, error).await,
        }
    }

    async fn process(&self, message: &InboundMessage) -> Result<Vec<String>, DispatchError> {
        let items = message.decode()?;
        if items.is_empty() {
            return Err(DispatchError::EmptyBatch);
        }

        debug!(
            delivery_tag = message.delivery_tag(),
            item_count = items.len(),
            processor = self.processor.name(),
            "Dispatching items"
        );

        let results = join_all(items.into_iter().map(|item| self.encode_one(item))).await;

        let mut outputs = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(mut item_outputs) => outputs.append(&mut item_outputs),
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(outputs),
        }
    }

    async fn encode_one(&self, item: ItemDescriptor) -> Result<Vec<String>, DispatchError> {
        let key = item.key.clone();
        let call = AssertUnwindSafe(self.processor.encode(vec![item]))
            .catch_unwind()
            .await;

        match call {
            Ok(Ok(outputs)) if outputs.len() == 1 => Ok(outputs),
            Ok(Ok(outputs)) => Err(DispatchError::Processor {
                key,
                source: ProcessorError::LengthMismatch {
                    expected: 1,
                    actual: outputs.len(),
                },
            }),
            Ok(Err(source)) => {
                warn!(key = %key, error = %source, "Item processing failed");
                Err(DispatchError::Processor { key, source })
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(key = %key, panic = %message, "Item processing panicked");
                Err(DispatchError::Panicked { key, message })
            }
        }
    }

    async fn acknowledge(&self, message: InboundMessage, outputs: Vec<String>) -> DispatchOutcome {
        let delivery_tag = message.delivery_tag();
        let body = body_preview(message.body(), BODY_PREVIEW_LIMIT);

        match message.ack().await {
            Ok(()) => {
                DispatchStats::incr(&self.stats.acked);
                info!(
                    delivery_tag = delivery_tag,
                    output_count = outputs.len(),
                    body = %body,
                    "Message acknowledged"
                );
                DispatchOutcome::Acked { outputs }
            }
            Err(e) => {
                DispatchStats::incr(&self.stats.settlement_failures);
                error!(
                    delivery_tag = delivery_tag,
                    body = %body,
                    error = %e,
                    "Failed to acknowledge message"
                );
                DispatchOutcome::Unsettled {
                    error: DispatchError::Settlement(e),
                }
            }
        }
    }

    async fn reject(&self, message: InboundMessage, error: DispatchError) -> DispatchOutcome {
        let delivery_tag = message.delivery_tag();
        let body = body_preview(message.body(), BODY_PREVIEW_LIMIT);

        match &error {
            DispatchError::Decode(_) | DispatchError::EmptyBatch => {
                DispatchStats::incr(&self.stats.decode_failures)
            }
            DispatchError::Processor { .. } | DispatchError::Panicked { .. } => {
                DispatchStats::incr(&self.stats.processor_failures)
            }
            DispatchError::GateClosed | DispatchError::Settlement(_) => {}
        }

        match message.reject().await {
            Ok(()) => {
                DispatchStats::incr(&self.stats.rejected);
                warn!(
                    delivery_tag = delivery_tag,
                    body = %body,
                    error = %error,
                    "Message rejected"
                );
                DispatchOutcome::Rejected { error }
            }
            Err(e) => {
                DispatchStats::incr(&self.stats.settlement_failures);
                error!(
                    delivery_tag = delivery_tag,
                    body = %body,
                    error = %error,
                    settlement_error = %e,
                    "Failed to reject message"
                );
                DispatchOutcome::Unsettled {
                    error: DispatchError::Settlement(e),
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
