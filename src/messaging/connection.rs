//! # RabbitMQ Connection
//!
//! Thin wrappers over `lapin` for the three setup steps the consumer needs:
//! connect, open a channel, declare the queue. Each step maps lapin failures
//! onto the [`BrokerError`] taxonomy.
//!
//! | Step | Failure |
//! |------|---------|
//! | [`BrokerConnection::connect`] | `Connection` / `Authentication` / `ReconnectExhausted` |
//! | [`BrokerConnection::channel`] | `Channel` |
//! | [`BrokerChannel::declare_queue`] | `QueueConflict` / `QueueDeclare` |

use lapin::options::{
    BasicCancelOptions, BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, info};

use super::errors::{BrokerError, BrokerResult};
use crate::config::BrokerConfig;
use crate::resilience::ReconnectPolicy;

/// Reply code for a normal AMQP close
const REPLY_SUCCESS: u16 = 200;

/// Result of a queue declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// A single AMQP connection
pub struct BrokerConnection {
    connection: Connection,
    config: BrokerConfig,
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("url", &self.config.url_redacted())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl BrokerConnection {
    /// Connect, retrying transient failures per `config.reconnect`
    pub async fn connect(config: &BrokerConfig) -> BrokerResult<Self> {
        ReconnectPolicy::from(&config.reconnect)
            .retry("connect", || Self::connect_once(config))
            .await
    }

    /// Single connection attempt
    pub async fn connect_once(config: &BrokerConfig) -> BrokerResult<Self> {
        debug!(url = %config.url_redacted(), "Connecting to RabbitMQ");

        let properties = ConnectionProperties::default()
            .with_connection_name(config.connection_name.clone().into());
        let connection = Connection::connect(&config.url, properties)
            .await
            .map_err(|e| BrokerError::from_connect(&e))?;

        info!(url = %config.url_redacted(), "Connected to RabbitMQ");

        Ok(Self {
            connection,
            config: config.clone(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Open an operational channel with the configured prefetch
    pub async fn channel(&self) -> BrokerResult<BrokerChannel> {
        if !self.is_connected() {
            return Err(BrokerError::channel("connection is not open"));
        }

        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::channel(format!("channel creation failed: {e}")))?;

        if self.config.prefetch_count > 0 {
            channel
                .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
                .await
                .map_err(|e| BrokerError::channel(format!("failed to set QoS: {e}")))?;
        }

        debug!(
            channel_id = channel.id(),
            prefetch_count = self.config.prefetch_count,
            "Channel created"
        );

        Ok(BrokerChannel {
            channel,
            config: self.config.clone(),
        })
    }

    /// Close the connection normally
    pub async fn close(&self) -> BrokerResult<()> {
        self.connection
            .close(REPLY_SUCCESS, "shutdown")
            .await
            .map_err(|e| BrokerError::connection(format!("close failed: {e}")))
    }
}

/// One channel on a [`BrokerConnection`]
pub struct BrokerChannel {
    pub(crate) channel: Channel,
    config: BrokerConfig,
}

impl std::fmt::Debug for BrokerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerChannel")
            .field("channel_id", &self.channel.id())
            .field("queue_name", &self.config.queue_name)
            .finish()
    }
}

impl BrokerChannel {
    /// Declare the configured queue
    ///
    /// Idempotent when the queue exists with the same flags.
    pub async fn declare_queue(&self) -> BrokerResult<QueueInfo> {
        let queue_name = &self.config.queue_name;
        let queue = self
            .channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: self.config.durable,
                    auto_delete: self.config.auto_delete,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::from_declare(queue_name, &e))?;

        let info = QueueInfo {
            name: queue.name().as_str().to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        };

        info!(
            queue = %info.name,
            message_count = info.message_count,
            consumer_count = info.consumer_count,
            auto_delete = self.config.auto_delete,
            durable = self.config.durable,
            "Queue declared"
        );

        Ok(info)
    }

    /// Start consuming the configured queue with manual acknowledgement
    pub async fn consume(&self) -> BrokerResult<Consumer> {
        self.channel
            .basic_consume(
                &self.config.queue_name,
                &self.config.consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::consume(&self.config.queue_name, e.to_string()))
    }

    /// Stop a consumer; unsettled deliveries stay with this channel
    pub async fn cancel(&self, consumer_tag: &str) -> BrokerResult<()> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| BrokerError::consume(&self.config.queue_name, format!("cancel failed: {e}")))
    }

    /// Close the channel normally
    pub async fn close(&self) -> BrokerResult<()> {
        self.channel
            .close(REPLY_SUCCESS, "shutdown")
            .await
            .map_err(|e| BrokerError::channel(format!("close failed: {e}")))
    }
}
