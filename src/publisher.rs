//! Domain event publishing over NATS.

use async_nats::Client;
use tracing::{debug, warn};

use crate::domain::events::DomainEvent;

/// Publishes events when a NATS connection is configured; otherwise a no-op.
#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<Client>) -> Self { Self { nats } }
    pub fn disabled() -> Self { Self::default() }

    /// Delivery failures are logged; callers never see them.
    pub async fn publish(&self, event: &DomainEvent) {
        let Some(nats) = &self.nats else { return };
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(subject = event.subject(), error = %e, "Could not encode event");
                return;
            }
        };
        match nats.publish(event.subject().to_string(), payload.into()).await {
            Ok(()) => debug!(subject = event.subject(), "Published event"),
            Err(e) => warn!(subject = event.subject(), error = %e, "Could not publish event"),
        }
    }
}
