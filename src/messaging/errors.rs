//! # Messaging Error Types
//!
//! Structured errors for everything that talks to the broker: connection setup,
//! channel and queue declaration, the delivery stream, and settlement.

use thiserror::Error;

/// Broker error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Broker authentication failed: {message}")]
    Authentication { message: String },

    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Queue {queue_name} already exists with incompatible flags: {message}")]
    QueueConflict { queue_name: String, message: String },

    #[error("Queue declaration failed: {queue_name}: {message}")]
    QueueDeclare { queue_name: String, message: String },

    #[error("Consume failed: {queue_name}: {message}")]
    Consume { queue_name: String, message: String },

    #[error("Delivery stream closed: {queue_name}")]
    StreamClosed { queue_name: String },

    #[error("Ack failed for delivery {delivery_tag}: {message}")]
    Acknowledge { delivery_tag: u64, message: String },

    #[error("Reject failed for delivery {delivery_tag}: {message}")]
    Reject { delivery_tag: u64, message: String },

    #[error("Reconnect gave up after {attempts} attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },
}

impl BrokerError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a channel error
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }

    /// Create a queue conflict error
    pub fn queue_conflict(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueueConflict {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create a queue declaration error
    pub fn queue_declare(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueueDeclare {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create a consume error
    pub fn consume(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consume {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create a stream closed error
    pub fn stream_closed(queue_name: impl Into<String>) -> Self {
        Self::StreamClosed {
            queue_name: queue_name.into(),
        }
    }

    /// Create an ack error
    pub fn acknowledge(delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Acknowledge {
            delivery_tag,
            message: message.into(),
        }
    }

    /// Create a reject error
    pub fn reject(delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Reject {
            delivery_tag,
            message: message.into(),
        }
    }

    /// Create a reconnect exhausted error
    pub fn reconnect_exhausted(attempts: u32, last_error: impl Into<String>) -> Self {
        Self::ReconnectExhausted {
            attempts,
            last_error: last_error.into(),
        }
    }

    /// Whether retrying the same operation later may succeed
    ///
    /// Rejected credentials and conflicting queue flags will fail the same way
    /// on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Channel { .. }
                | Self::Consume { .. }
                | Self::StreamClosed { .. }
        )
    }

    /// Classify a lapin error raised while connecting
    pub fn from_connect(err: &lapin::Error) -> Self {
        Self::classify_connect(err.to_string())
    }

    /// Classify a lapin error raised by `queue.declare`
    pub fn from_declare(queue_name: &str, err: &lapin::Error) -> Self {
        Self::classify_declare(queue_name, err.to_string())
    }

    /// Connect failures naming `ACCESS_REFUSED` are rejected credentials
    fn classify_connect(message: String) -> Self {
        if message.contains("ACCESS_REFUSED") {
            Self::authentication(message)
        } else {
            Self::connection(message)
        }
    }

    /// RabbitMQ answers a redeclaration with different flags with
    /// `PRECONDITION_FAILED`
    fn classify_declare(queue_name: &str, message: String) -> Self {
        if message.contains("PRECONDITION_FAILED") {
            Self::queue_conflict(queue_name, message)
        } else {
            Self::queue_declare(queue_name, message)
        }
    }
}

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
