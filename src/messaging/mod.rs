//! # Messaging Module
//!
//! RabbitMQ intake for the dispatcher: connection setup, the delivery stream
//! abstraction, message settlement, and an in-memory broker for tests.

pub mod amqp_source;
pub mod connection;
pub mod errors;
pub mod in_memory;
pub mod message;
pub mod reconnecting;
pub mod source;

pub use amqp_source::{AmqpMessageSource, AmqpSession, AmqpSessionFactory};
pub use connection::{BrokerChannel, BrokerConnection, QueueInfo};
pub use errors::{BrokerError, BrokerResult};
pub use in_memory::{InMemoryBroker, InMemorySource, Settlement, SettlementKind};
pub use message::{decode_body, Acknowledger, DecodeError, InboundMessage, ItemDescriptor};
pub use reconnecting::{DeliverySession, ReconnectingSource, SessionFactory};
pub use source::MessageSource;
