//! # AMQP Message Source
//!
//! [`MessageSource`](super::MessageSource) over a live RabbitMQ queue.
//!
//! An [`AmqpSession`] is one connection, one channel (with QoS) and one
//! consumer on the declared queue. [`AmqpMessageSource`] is a
//! [`ReconnectingSource`] over [`AmqpSessionFactory`], so a broken delivery
//! stream rebuilds all of it under the configured [`ReconnectPolicy`].

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicRejectOptions};
use lapin::Consumer;
use tracing::{debug, info};

use super::connection::{BrokerChannel, BrokerConnection};
use super::errors::{BrokerError, BrokerResult};
use super::message::{Acknowledger, InboundMessage};
use super::reconnecting::{DeliverySession, ReconnectingSource, SessionFactory};
use crate::config::BrokerConfig;
use crate::resilience::ReconnectPolicy;

/// RabbitMQ-backed message source
pub type AmqpMessageSource = ReconnectingSource<AmqpSessionFactory>;

impl AmqpMessageSource {
    pub fn new(config: BrokerConfig) -> Self {
        let policy = ReconnectPolicy::from(&config.reconnect);
        Self::with_factory(AmqpSessionFactory { config }, policy)
    }
}

/// Settles a delivery through lapin's per-delivery acker
struct AmqpAcker {
    delivery_tag: u64,
    acker: Acker,
    requeue_on_reject: bool,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> BrokerResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::acknowledge(self.delivery_tag, e.to_string()))
    }

    async fn reject(&self) -> BrokerResult<()> {
        self.acker
            .reject(BasicRejectOptions {
                requeue: self.requeue_on_reject,
            })
            .await
            .map_err(|e| BrokerError::reject(self.delivery_tag, e.to_string()))
    }
}

/// Connects to RabbitMQ and starts a consumer on the configured queue
pub struct AmqpSessionFactory {
    config: BrokerConfig,
}

impl std::fmt::Debug for AmqpSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpSessionFactory")
            .field("url", &self.config.url_redacted())
            .field("queue_name", &self.config.queue_name)
            .finish()
    }
}

#[async_trait]
impl SessionFactory for AmqpSessionFactory {
    type Session = AmqpSession;

    /// Connect, open a channel, declare the queue and start consuming
    async fn establish(&self) -> BrokerResult<AmqpSession> {
        let connection = BrokerConnection::connect_once(&self.config).await?;
        let channel = connection.channel().await?;
        channel.declare_queue().await?;
        let consumer = channel.consume().await?;
        let consumer_tag = consumer.tag().as_str().to_string();

        info!(
            queue = %self.config.queue_name,
            consumer_tag = %consumer_tag,
            "Consuming from queue"
        );

        Ok(AmqpSession {
            connection,
            channel,
            consumer,
            consumer_tag,
            queue_name: self.config.queue_name.clone(),
            requeue_on_reject: self.config.requeue_on_reject,
        })
    }

    fn queue_name(&self) -> &str {
        &self.config.queue_name
    }
}

/// One connection, channel and consumer
pub struct AmqpSession {
    connection: BrokerConnection,
    channel: BrokerChannel,
    consumer: Consumer,
    consumer_tag: String,
    queue_name: String,
    requeue_on_reject: bool,
}

impl AmqpSession {
    fn to_message(&self, delivery: Delivery) -> InboundMessage {
        let acker = AmqpAcker {
            delivery_tag: delivery.delivery_tag,
            acker: delivery.acker,
            requeue_on_reject: self.requeue_on_reject,
        };
        InboundMessage::new(
            delivery.delivery_tag,
            delivery.redelivered,
            delivery.data,
            acker,
        )
    }
}

#[async_trait]
impl DeliverySession for AmqpSession {
    async fn next_delivery(&mut self) -> Option<BrokerResult<InboundMessage>> {
        match self.consumer.next().await? {
            Ok(delivery) => Some(Ok(self.to_message(delivery))),
            Err(e) => Some(Err(BrokerError::consume(&self.queue_name, e.to_string()))),
        }
    }

    async fn cancel(&mut self) -> BrokerResult<()> {
        debug!(consumer_tag = %self.consumer_tag, "Cancelling consumer");
        self.channel.cancel(&self.consumer_tag).await
    }

    async fn close(&mut self) -> BrokerResult<()> {
        // The connection close below tears the channel down regardless.
        let _ = self.channel.close().await;
        self.connection.close().await
    }
}
