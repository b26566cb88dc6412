//! Message bus seam: connection, subscriptions, publish, and request/reply.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_stream::Stream;

use crate::error::BusResult;

/// Stream of messages delivered to one subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Concrete subject the message was published on.
    pub subject: String,
    /// Reply subject when the sender expects an answer.
    pub reply: Option<String>,
    /// Raw message body.
    pub payload: Bytes,
}

impl InboundMessage {
    /// Leading subject token, which carries the unit id for unit-scoped subjects.
    #[must_use]
    pub fn subject_unit(&self) -> Option<&str> {
        self.subject.split('.').next().filter(|token| !token.is_empty())
    }
}

/// A live bus connection.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Subscribe to a subject (wildcards allowed) and stream its messages.
    async fn subscribe(&self, subject: &str) -> BusResult<MessageStream>;

    /// Publish a message without expecting a reply.
    async fn publish(&self, subject: &str, payload: Bytes) -> BusResult<()>;

    /// Send a request and wait up to `timeout` for the first reply.
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> BusResult<Bytes>;

    /// Whether the connection is currently established.
    fn is_connected(&self) -> bool;
}

/// Factory for bus connections.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Address dialled by [`BusConnector::connect`], for logging.
    fn address(&self) -> &str;

    /// Open a new connection.
    async fn connect(&self) -> BusResult<Arc<dyn MessageBus>>;
}
