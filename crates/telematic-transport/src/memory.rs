//! In-process message bus.
//!
//! # Design
//! - A [`MemoryBroker`] owns the subscription table; every [`MemoryBus`]
//!   connected to it sees the same subjects, like clients of one server.
//! - Requests use a private inbox subscription; a request that matches no
//!   subscriber fails fast with `NoResponders`.
//! - Every publish is journaled so tests can assert on delivery order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use telematic_core::{BusConnector, BusError, BusResult, InboundMessage, MessageBus, MessageStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::subject;

const MEMORY_ADDRESS: &str = "memory://local";

struct Subscription {
    pattern: String,
    sender: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Default)]
struct BrokerState {
    subscriptions: Vec<Subscription>,
    journal: Vec<InboundMessage>,
}

/// Shared subject table for in-process buses.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    inbox_seq: Arc<AtomicU64>,
}

impl MemoryBroker {
    /// Empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a connected bus on this broker.
    #[must_use]
    pub fn bus(&self) -> MemoryBus {
        MemoryBus {
            broker: self.clone(),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Connector handing out buses on this broker.
    #[must_use]
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    fn subscribe(&self, pattern: &str) -> mpsc::UnboundedReceiver<InboundMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().subscriptions.push(Subscription {
            pattern: pattern.to_string(),
            sender,
        });
        receiver
    }

    /// Deliver a message to every live matching subscription; returns the delivery count.
    fn deliver(&self, message: InboundMessage) -> usize {
        let mut state = self.lock();
        state.journal.push(message.clone());
        let mut delivered = 0;
        state.subscriptions.retain(|subscription| {
            if subscription.sender.is_closed() {
                return false;
            }
            if subject::matches(&subscription.pattern, &message.subject)
                && subscription.sender.send(message.clone()).is_ok()
            {
                delivered += 1;
            }
            true
        });
        delivered
    }

    fn next_inbox(&self) -> String {
        format!("_INBOX.{}", self.inbox_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Every message published so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<InboundMessage> {
        self.lock().journal.clone()
    }

    /// Messages published on subjects matched by `pattern`.
    #[must_use]
    pub fn published_on(&self, pattern: &str) -> Vec<InboundMessage> {
        self.lock()
            .journal
            .iter()
            .filter(|message| subject::matches(pattern, &message.subject))
            .cloned()
            .collect()
    }

    /// Live subscriptions whose pattern is exactly `pattern`.
    #[must_use]
    pub fn subscription_count(&self, pattern: &str) -> usize {
        self.lock()
            .subscriptions
            .iter()
            .filter(|subscription| {
                subscription.pattern == pattern && !subscription.sender.is_closed()
            })
            .count()
    }

    /// Answer requests on `pattern` with whatever `handler` returns.
    ///
    /// Returning `None` leaves the request unanswered, which the requester
    /// observes as a timeout.
    pub fn spawn_responder<F>(&self, pattern: &str, handler: F) -> JoinHandle<()>
    where
        F: Fn(&InboundMessage) -> Option<Bytes> + Send + 'static,
    {
        let broker = self.clone();
        let mut receiver = self.subscribe(pattern);
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                let (Some(reply), Some(payload)) = (message.reply.clone(), handler(&message))
                else {
                    continue;
                };
                broker.deliver(InboundMessage {
                    subject: reply,
                    reply: None,
                    payload,
                });
            }
        })
    }
}

/// One client connection to a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryBus {
    broker: MemoryBroker,
    connected: Arc<AtomicBool>,
}

impl MemoryBus {
    /// Simulate a dropped or restored connection.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn ensure_connected(&self, subject: &str) -> BusResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BusError::Request {
                subject: subject.to_string(),
                detail: "connection closed".into(),
            })
        }
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn subscribe(&self, subject: &str) -> BusResult<MessageStream> {
        if !self.is_connected() {
            return Err(BusError::Subscribe {
                subject: subject.to_string(),
                detail: "connection closed".into(),
            });
        }
        let receiver = self.broker.subscribe(subject);
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> BusResult<()> {
        if !self.is_connected() || !subject::is_concrete(subject) {
            return Err(BusError::Publish {
                subject: subject.to_string(),
                detail: "connection closed or subject invalid".into(),
            });
        }
        self.broker.deliver(InboundMessage {
            subject: subject.to_string(),
            reply: None,
            payload,
        });
        Ok(())
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> BusResult<Bytes> {
        self.ensure_connected(subject)?;
        let inbox = self.broker.next_inbox();
        let mut replies = self.broker.subscribe(&inbox);
        let delivered = self.broker.deliver(InboundMessage {
            subject: subject.to_string(),
            reply: Some(inbox),
            payload,
        });
        if delivered == 0 {
            return Err(BusError::NoResponders {
                subject: subject.to_string(),
            });
        }
        match tokio::time::timeout(timeout, replies.recv()).await {
            Ok(Some(reply)) => Ok(reply.payload),
            Ok(None) | Err(_) => Err(BusError::TimedOut {
                subject: subject.to_string(),
            }),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Connector returning fresh [`MemoryBus`] handles on one broker.
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

#[async_trait]
impl BusConnector for MemoryConnector {
    fn address(&self) -> &str {
        MEMORY_ADDRESS
    }

    async fn connect(&self) -> BusResult<Arc<dyn MessageBus>> {
        Ok(Arc::new(self.broker.bus()))
    }
}
