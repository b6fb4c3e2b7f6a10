//! Message source seam between the consumer loop and a broker.

use async_trait::async_trait;

use super::errors::BrokerResult;
use super::message::InboundMessage;

/// A stream of deliveries from one queue
///
/// The consumer loop drives a source through `open` → `next_message`* → `close`
/// → (drain in-flight work) → `disconnect`.
#[async_trait]
pub trait MessageSource: Send + 'static {
    /// Establish whatever the source needs before deliveries can flow
    ///
    /// Errors here are setup failures and end the consumer loop.
    async fn open(&mut self) -> BrokerResult<()>;

    /// Wait for the next delivery
    ///
    /// `None` means intake ended deliberately (the source was closed or drained).
    /// `Some(Err(_))` is an iteration failure the source could not heal itself.
    /// Must be cancel-safe: the consumer loop races it against shutdown.
    async fn next_message(&mut self) -> Option<BrokerResult<InboundMessage>>;

    /// Stop intake; deliveries already handed out remain settleable
    async fn close(&mut self) -> BrokerResult<()>;

    /// Release the underlying connection once in-flight work has drained
    async fn disconnect(&mut self) -> BrokerResult<()> {
        Ok(())
    }

    /// Name of the queue being consumed, for logging
    fn queue_name(&self) -> &str;
}
