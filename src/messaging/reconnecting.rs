//! # Reconnecting Source
//!
//! [`MessageSource`] that heals its own delivery stream.
//!
//! A [`SessionFactory`] knows how to build one [`DeliverySession`]: connect,
//! open a channel, declare the queue and start consuming. When the session's
//! stream errors or ends while intake is still wanted, [`ReconnectingSource`]
//! throws the session away and builds a new one under its [`ReconnectPolicy`].
//! Only when the policy gives up does the failure reach the consumer loop.
//!
//! Deliveries handed out by a dead session cannot be settled any more; the
//! broker redelivers them on the new session.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::errors::{BrokerError, BrokerResult};
use super::message::InboundMessage;
use super::source::MessageSource;
use crate::resilience::ReconnectPolicy;

/// One live consumer on the broker
#[async_trait]
pub trait DeliverySession: Send + 'static {
    /// Next delivery; `None` when the broker ended the stream
    async fn next_delivery(&mut self) -> Option<BrokerResult<InboundMessage>>;

    /// Ask the broker to stop sending deliveries to this session
    async fn cancel(&mut self) -> BrokerResult<()>;

    /// Close the session's channel and connection
    async fn close(&mut self) -> BrokerResult<()>;
}

/// Builds a fresh [`DeliverySession`] from scratch
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: DeliverySession;

    /// One attempt; retries are the caller's business
    async fn establish(&self) -> BrokerResult<Self::Session>;

    fn queue_name(&self) -> &str;
}

/// Message source that rebuilds its session when the stream fails
pub struct ReconnectingSource<F: SessionFactory> {
    factory: F,
    policy: ReconnectPolicy,
    session: Option<F::Session>,
    closed: bool,
    reconnects: u64,
}

impl<F: SessionFactory> std::fmt::Debug for ReconnectingSource<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingSource")
            .field("queue_name", &self.factory.queue_name())
            .field("policy", &self.policy)
            .field("connected", &self.session.is_some())
            .field("closed", &self.closed)
            .field("reconnects", &self.reconnects)
            .finish()
    }
}

impl<F: SessionFactory> ReconnectingSource<F> {
    pub fn with_factory(factory: F, policy: ReconnectPolicy) -> Self {
        Self {
            factory,
            policy,
            session: None,
            closed: false,
            reconnects: 0,
        }
    }

    /// Times the session was rebuilt after a stream failure
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn reconnect(&mut self) -> BrokerResult<()> {
        if let Some(mut old) = self.session.take() {
            // Best effort; the old connection is usually already gone.
            if let Err(e) = old.close().await {
                debug!(error = %e, "Old session did not close cleanly");
            }
        }
        let factory = &self.factory;
        let session = self
            .policy
            .retry("broker session", || factory.establish())
            .await?;
        self.session = Some(session);
        Ok(())
    }
}

#[async_trait]
impl<F: SessionFactory> MessageSource for ReconnectingSource<F> {
    async fn open(&mut self) -> BrokerResult<()> {
        self.closed = false;
        self.reconnect().await
    }

    async fn next_message(&mut self) -> Option<BrokerResult<InboundMessage>> {
        loop {
            if self.closed {
                return None;
            }

            let next = match self.session.as_mut() {
                Some(session) => session.next_delivery().await,
                None => None,
            };

            let failure = match next {
                Some(Ok(message)) => return Some(Ok(message)),
                Some(Err(e)) => e,
                None => BrokerError::stream_closed(self.factory.queue_name()),
            };

            warn!(
                queue = %self.factory.queue_name(),
                error = %failure,
                "Delivery stream interrupted, reconnecting"
            );

            if let Err(error) = self.reconnect().await {
                return Some(Err(error));
            }
            self.reconnects += 1;
            info!(
                queue = %self.factory.queue_name(),
                reconnects = self.reconnects,
                "Delivery stream restored"
            );
        }
    }

    async fn close(&mut self) -> BrokerResult<()> {
        self.closed = true;
        match self.session.as_mut() {
            Some(session) => session.cancel().await,
            None => Ok(()),
        }
    }

    async fn disconnect(&mut self) -> BrokerResult<()> {
        match self.session.take() {
            Some(mut session) => {
                session.close().await?;
                info!(queue = %self.factory.queue_name(), "Disconnected from broker");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn queue_name(&self) -> &str {
        self.factory.queue_name()
    }
}
