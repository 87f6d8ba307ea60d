//! Domain events
use serde::Serialize;
use uuid::Uuid;

use crate::domain::run::SyncRunResult;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    SyncCompleted { run: SyncRunResult },
    WebhookApplied { endpoint: String, event_type: String, applied: u32, rejected: u32 },
    OrderPropagated { order_id: Uuid, erp_order_id: i64, unmatched_lines: usize, confirmed: bool },
    OrderPropagationFailed { order_id: Uuid, step: String, reason: String },
}

impl DomainEvent {
    /// Subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::SyncCompleted { .. } => "erp.sync.completed",
            Self::WebhookApplied { .. } => "erp.webhook.applied",
            Self::OrderPropagated { .. } => "erp.order.propagated",
            Self::OrderPropagationFailed { .. } => "erp.order.propagation_failed",
        }
    }
}
