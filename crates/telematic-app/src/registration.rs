//! Unit registration: resolve the unit to an active event, record it, reply.
//!
//! # Design
//! - The registry upsert happens before the reply is published, so a unit
//!   that sees its reply is already visible to the prober.
//! - Malformed or unresolvable registrations are dropped without a reply.
//! - Each inbound message is handled in its own task.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use telematic_core::{
    EventLookup, EventStatus, EventStatusService, InboundMessage, MessageBus, RegisteredUnit,
    RegistrationRequest,
};
use telematic_telemetry::{Metrics, RegistrationOutcome};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::registry::UnitRegistry;

/// Subject units publish registrations on.
pub const REGISTRATION_SUBJECT: &str = "*.register_unit";

/// What happened to one registration message.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// The unit was recorded; carries the registry entry.
    Registered(RegisteredUnit),
    /// The payload was not a registration.
    Malformed,
    /// No active event matched the unit.
    Unresolved {
        /// Unit that could not be resolved.
        unit_id: String,
    },
    /// The lookup service failed.
    LookupFailed {
        /// Unit being resolved.
        unit_id: String,
    },
}

impl HandleOutcome {
    const fn metric(&self) -> RegistrationOutcome {
        match self {
            Self::Registered(_) => RegistrationOutcome::Registered,
            Self::Malformed => RegistrationOutcome::Malformed,
            Self::Unresolved { .. } => RegistrationOutcome::Unresolved,
            Self::LookupFailed { .. } => RegistrationOutcome::LookupFailed,
        }
    }
}

/// Processes single registration messages.
pub struct RegistrationHandler {
    bus: Arc<dyn MessageBus>,
    lookup: Arc<dyn EventLookup>,
    status: Arc<dyn EventStatusService>,
    registry: Arc<UnitRegistry>,
    metrics: Metrics,
}

impl RegistrationHandler {
    /// Handler wired to its collaborators.
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        lookup: Arc<dyn EventLookup>,
        status: Arc<dyn EventStatusService>,
        registry: Arc<UnitRegistry>,
        metrics: Metrics,
    ) -> Self {
        Self {
            bus,
            lookup,
            status,
            registry,
            metrics,
        }
    }

    /// Handle one inbound registration message.
    pub async fn handle(&self, message: &InboundMessage) -> HandleOutcome {
        let outcome = self.process(message).await;
        self.metrics.inc_registration(outcome.metric());
        self.metrics.set_registered_units(self.registry.len());
        outcome
    }

    async fn process(&self, message: &InboundMessage) -> HandleOutcome {
        let request = match RegistrationRequest::parse(&message.payload) {
            Ok(request) => request,
            Err(err) => {
                error!(subject = %message.subject, error = %err, "dropping malformed registration");
                return HandleOutcome::Malformed;
            }
        };

        let event = match self
            .lookup
            .find_active_event(&request.unit_id, Utc::now())
            .await
        {
            Ok(Some(event)) => event,
            Ok(None) => {
                error!(unit_id = %request.unit_id, "no active event for unit, dropping registration");
                return HandleOutcome::Unresolved {
                    unit_id: request.unit_id,
                };
            }
            Err(err) => {
                error!(unit_id = %request.unit_id, error = %err, "event lookup failed, dropping registration");
                return HandleOutcome::LookupFailed {
                    unit_id: request.unit_id,
                };
            }
        };

        let unit = request.attach(&event);
        if let Err(err) = self
            .status
            .set_event_status(EventStatus::Live, event.id)
            .await
        {
            warn!(event_id = event.id, error = %err, "failed to mark event live");
        }
        self.registry.upsert(unit.clone());
        info!(unit_id = %unit.unit_id, event_id = unit.event_id, "unit registered");

        self.reply(message, &unit).await;
        HandleOutcome::Registered(unit)
    }

    async fn reply(&self, message: &InboundMessage, unit: &RegisteredUnit) {
        let Some(reply) = message.reply.as_deref() else {
            warn!(unit_id = %unit.unit_id, "registration has no reply subject");
            return;
        };
        let payload = match serde_json::to_vec(unit) {
            Ok(payload) => Bytes::from(payload),
            Err(err) => {
                error!(unit_id = %unit.unit_id, error = %err, "failed to encode registration reply");
                return;
            }
        };
        if let Err(err) = self.bus.publish(reply, payload).await {
            warn!(unit_id = %unit.unit_id, error = %err, "failed to publish registration reply");
        }
    }
}

/// Why a listener stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// The cancellation token fired.
    Cancelled,
    /// The subscription could not be created or was closed by the bus.
    SubscriptionLost,
}

/// Subscribes to registrations and fans messages out to the handler.
pub struct RegistrationListener {
    handler: Arc<RegistrationHandler>,
    bus: Arc<dyn MessageBus>,
}

impl RegistrationListener {
    /// Listener feeding `handler` from `bus`.
    #[must_use]
    pub const fn new(handler: Arc<RegistrationHandler>, bus: Arc<dyn MessageBus>) -> Self {
        Self { handler, bus }
    }

    /// Consume registrations until cancelled or the subscription ends.
    pub async fn run(self, cancel: CancellationToken) -> ListenerExit {
        let mut stream = match self.bus.subscribe(REGISTRATION_SUBJECT).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(subject = REGISTRATION_SUBJECT, error = %err, "registration subscription failed");
                return ListenerExit::SubscriptionLost;
            }
        };
        info!(subject = REGISTRATION_SUBJECT, "listening for unit registrations");

        let mut tasks = JoinSet::new();
        let exit = loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(err) = joined {
                    warn!(error = %err, "registration task failed");
                }
            }
            tokio::select! {
                () = cancel.cancelled() => break ListenerExit::Cancelled,
                next = stream.next() => match next {
                    Some(message) => {
                        let handler = Arc::clone(&self.handler);
                        tasks.spawn(async move {
                            handler.handle(&message).await;
                        });
                    }
                    None => {
                        warn!(subject = REGISTRATION_SUBJECT, "registration subscription closed");
                        break ListenerExit::SubscriptionLost;
                    }
                }
            }
        };
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "registration task failed");
            }
        }
        exit
    }
}
