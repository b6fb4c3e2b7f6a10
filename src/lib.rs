#![allow(clippy::doc_markdown)] // Allow technical terms like RabbitMQ, AMQP in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Queue Dispatch
//!
//! Queue-driven dispatcher that consumes batched work items from RabbitMQ and fans
//! each item out to a downstream encoding service, bounded by a process-wide
//! admission gate.
//!
//! ## Architecture
//!
//! ```text
//! RabbitMQ ──► ConsumerLoop ──spawn──► Dispatcher ──► [AdmissionGate] ──► Processor × N
//!                  │                        │
//!                  └─ never waits           └─ all ok → ack, any failure → reject
//! ```
//!
//! - The [`dispatch::ConsumerLoop`] pulls one delivery at a time and spawns a
//!   [`dispatch::Dispatcher`] task for it without awaiting the result.
//! - Each dispatcher task holds an [`admission::AdmissionPermit`] for its whole body,
//!   so at most `schedule_concurrency` messages are being processed at once.
//! - Every descriptor in a message is sent to the [`processor::Processor`] concurrently;
//!   the message is acknowledged only if all of them succeed.
//! - Errors inside a dispatcher task are contained there. Errors from the broker
//!   connection itself end the loop and the process exits non-zero.
//!
//! ## Module Organization
//!
//! - [`config`] - Configuration structs and the layered loader
//! - [`logging`] - Tracing subscriber setup
//! - [`error`] - Service-level errors and exit status
//! - [`messaging`] - Broker connection, message handles, and message sources
//! - [`admission`] - Bounded concurrency gate
//! - [`resilience`] - Reconnect backoff policy
//! - [`processor`] - Downstream processor seam and HTTP client
//! - [`dispatch`] - Per-message dispatcher and the consumer loop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use queue_dispatch::config::loader;
//! use queue_dispatch::dispatch::ConsumerLoop;
//! use queue_dispatch::messaging::AmqpMessageSource;
//! use queue_dispatch::processor::HttpProcessor;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = loader::load_from_env()?;
//! let processor = Arc::new(HttpProcessor::new(config.processor.clone())?);
//! let source = AmqpMessageSource::new(config.broker.clone());
//!
//! let consumer = ConsumerLoop::new(source, processor, &config)?;
//! let shutdown = async {
//!     let _ = tokio::signal::ctrl_c().await;
//! };
//! let outcome = consumer.run(shutdown).await;
//! std::process::exit(outcome.exit_status().code());
//! # }
//! ```

pub mod admission;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod processor;
pub mod resilience;

pub use self::admission::{AdmissionGate, AdmissionPermit, GateError};
pub use self::config::{ConfigError, DispatchConfig};
pub use self::dispatch::{ConsumerLoop, ConsumerState, DispatchOutcome, Dispatcher, LoopOutcome};
pub use self::error::{ExitStatus, ServiceError, ServiceResult};
pub use self::messaging::{BrokerError, InboundMessage, ItemDescriptor, MessageSource};
pub use self::processor::{Processor, ProcessorError};
