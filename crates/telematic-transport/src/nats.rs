//! NATS bus adapter built on `async-nats`.

use std::sync::Arc;
use std::time::Duration;

use async_nats::client::RequestErrorKind;
use async_nats::connection::State;
use async_nats::{Client, ConnectOptions, Request};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use telematic_core::{BusConnector, BusError, BusResult, InboundMessage, MessageBus, MessageStream};
use tracing::{info, warn};

/// Dials NATS servers with the configured reconnect policy.
#[derive(Debug, Clone)]
pub struct NatsConnector {
    url: String,
    max_reconnects: Option<usize>,
    name: String,
}

impl NatsConnector {
    /// Connector for `url`; `max_reconnects = None` reconnects forever.
    #[must_use]
    pub fn new(url: impl Into<String>, max_reconnects: Option<usize>) -> Self {
        Self {
            url: url.into(),
            max_reconnects,
            name: "telematic-bridge".into(),
        }
    }

    /// Client name reported to the server.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn options(&self) -> ConnectOptions {
        let address = self.url.clone();
        ConnectOptions::new()
            .name(&self.name)
            .max_reconnects(self.max_reconnects)
            .event_callback(move |event| {
                let address = address.clone();
                async move {
                    match event {
                        async_nats::Event::Connected => info!(%address, "bus connected"),
                        async_nats::Event::Disconnected => warn!(%address, "bus disconnected"),
                        other => info!(%address, event = %other, "bus connection event"),
                    }
                }
            })
    }
}

#[async_trait]
impl BusConnector for NatsConnector {
    fn address(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> BusResult<Arc<dyn MessageBus>> {
        let client = self
            .options()
            .connect(self.url.as_str())
            .await
            .map_err(|err| BusError::Connect {
                address: self.url.clone(),
                detail: err.to_string(),
            })?;
        Ok(Arc::new(NatsBus::new(client)))
    }
}

/// [`MessageBus`] over an `async-nats` client.
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Wrap a connected client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

fn convert(message: async_nats::Message) -> InboundMessage {
    InboundMessage {
        subject: message.subject.to_string(),
        reply: message.reply.map(|reply| reply.to_string()),
        payload: message.payload,
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn subscribe(&self, subject: &str) -> BusResult<MessageStream> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|err| BusError::Subscribe {
                subject: subject.to_string(),
                detail: err.to_string(),
            })?;
        Ok(subscriber.map(convert).boxed())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> BusResult<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|err| BusError::Publish {
                subject: subject.to_string(),
                detail: err.to_string(),
            })
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> BusResult<Bytes> {
        let request = Request::new().payload(payload).timeout(Some(timeout));
        match self.client.send_request(subject.to_string(), request).await {
            Ok(message) => Ok(message.payload),
            Err(err) => Err(match err.kind() {
                RequestErrorKind::TimedOut => BusError::TimedOut {
                    subject: subject.to_string(),
                },
                RequestErrorKind::NoResponders => BusError::NoResponders {
                    subject: subject.to_string(),
                },
                RequestErrorKind::Other => BusError::Request {
                    subject: subject.to_string(),
                    detail: err.to_string(),
                },
            }),
        }
    }

    fn is_connected(&self) -> bool {
        matches!(self.client.connection_state(), State::Connected)
    }
}
