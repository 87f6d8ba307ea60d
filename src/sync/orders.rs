//! Order Propagator
//!
//! Mirrors a placed order into the ERP as a sales document: partner, lines,
//! sales order, then an optional confirmation. Checkout never waits on this
//! and never fails because of it. The outcome lands in the order's metadata
//! and on the event bus; the order's own status is never touched.

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::aggregates::Order;
use crate::domain::events::DomainEvent;
use crate::domain::{ExternalId, PartnerInfo, SalesOrderDraft, SalesOrderLine, Sku};
use crate::erp::{ErpError, ErpGateway};
use crate::publisher::EventPublisher;
use crate::store::Repositories;
use crate::sync::locks::KeyedLocks;

pub const META_ERP_ORDER_ID: &str = "erp_order_id";
pub const META_ERP_PARTNER_ID: &str = "erp_partner_id";
pub const META_ERP_SYNC_STATUS: &str = "erp_sync_status";
pub const META_ERP_FAILED_STEP: &str = "erp_failed_step";
pub const META_ERP_ERROR: &str = "erp_error";
pub const META_ERP_UNMATCHED_SKUS: &str = "erp_unmatched_skus";
pub const META_ERP_CONFIRMED: &str = "erp_confirmed";
pub const META_ERP_SYNCED_AT: &str = "erp_synced_at";

/// Subject carrying `{"order_id": "<uuid>"}` when checkout places an order.
pub const ORDER_PLACED_SUBJECT: &str = "orders.placed";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationStep { Load, Partner, Lines, SalesOrder, Confirm }

impl PropagationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load", Self::Partner => "partner", Self::Lines => "lines",
            Self::SalesOrder => "sales_order", Self::Confirm => "confirm",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationStatus { Propagated, Failed, Skipped }

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PropagationOutcome {
    pub order_id: Uuid,
    pub status: PropagationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erp_order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<i64>,
    pub unmatched_skus: Vec<String>,
    pub confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<PropagationStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PropagationOutcome {
    fn new(order_id: Uuid, status: PropagationStatus) -> Self {
        Self { order_id, status, erp_order_id: None, partner_id: None, unmatched_skus: vec![], confirmed: false, failed_step: None, error: None }
    }

    fn failed(mut self, step: PropagationStep, error: impl Into<String>) -> Self {
        self.status = PropagationStatus::Failed;
        self.failed_step = Some(step);
        self.error = Some(error.into());
        self
    }

    fn skipped(order_id: Uuid, reason: impl Into<String>) -> Self {
        let mut outcome = Self::new(order_id, PropagationStatus::Skipped);
        outcome.error = Some(reason.into());
        outcome
    }

    pub fn is_propagated(&self) -> bool { self.status == PropagationStatus::Propagated }
}

pub struct OrderPropagator {
    erp: Arc<dyn ErpGateway>,
    repos: Repositories,
    locks: KeyedLocks,
    publisher: EventPublisher,
    auto_confirm: bool,
}

impl OrderPropagator {
    pub fn new(erp: Arc<dyn ErpGateway>, repos: Repositories, locks: KeyedLocks, publisher: EventPublisher, auto_confirm: bool) -> Self {
        Self { erp, repos, locks, publisher, auto_confirm }
    }

    /// Fire-and-forget propagation for the order-placed signal.
    pub fn spawn(self: &Arc<Self>, order_id: Uuid) -> JoinHandle<PropagationOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.on_order_placed(order_id).await })
    }

    /// Propagate one order. Every failure is captured in the outcome.
    ///
    /// The order lock is held for the whole attempt, so a repeated signal waits
    /// and then sees the ERP order id written by the first one.
    pub async fn on_order_placed(&self, order_id: Uuid) -> PropagationOutcome {
        let _guard = self.locks.lock(KeyedLocks::order_key(order_id)).await;
        let order = match self.repos.orders.find(order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => return PropagationOutcome::new(order_id, PropagationStatus::Failed).failed(PropagationStep::Load, "order not found"),
            Err(e) => return PropagationOutcome::new(order_id, PropagationStatus::Failed).failed(PropagationStep::Load, e.to_string()),
        };
        if !order.is_placed() {
            return PropagationOutcome::skipped(order_id, format!("order is {}", order.status.as_str()));
        }
        let outcome = match order.metadata.get(META_ERP_ORDER_ID).filter(|v| !v.is_null()) {
            None => self.propagate(&order).await,
            Some(existing) => match existing.as_i64() {
                Some(erp_order_id) if confirm_pending(&order) => self.retry_confirm(&order, erp_order_id).await,
                _ => return PropagationOutcome::skipped(order_id, format!("already propagated as ERP order {existing}")),
            },
        };
        self.record(&order, &outcome).await;
        outcome
    }

    async fn propagate(&self, order: &Order) -> PropagationOutcome {
        let mut outcome = PropagationOutcome::new(order.id, PropagationStatus::Propagated);

        let partner_id = match self.resolve_partner(order).await {
            Ok(id) => id,
            Err(e) => return outcome.failed(PropagationStep::Partner, e.to_string()),
        };
        outcome.partner_id = Some(partner_id);

        let lines = match self.build_lines(order).await {
            Ok(lines) => lines,
            Err(e) => return outcome.failed(PropagationStep::Lines, e.to_string()),
        };
        outcome.unmatched_skus = order.items.iter().zip(&lines)
            .filter(|(_, line)| !line.is_matched())
            .map(|(item, _)| item.sku.clone().unwrap_or_else(|| item.title.clone()))
            .collect();

        let note = (!outcome.unmatched_skus.is_empty())
            .then(|| format!("Unmatched storefront SKUs: {}", outcome.unmatched_skus.join(", ")));
        let draft = SalesOrderDraft { partner_id, client_reference: order.order_number.clone(), note, lines };
        let erp_order_id = match self.erp.create_sales_order(&draft).await {
            Ok(id) => id,
            Err(e) => return outcome.failed(PropagationStep::SalesOrder, e.to_string()),
        };
        outcome.erp_order_id = Some(erp_order_id);

        if self.auto_confirm {
            self.confirm(order, erp_order_id, &mut outcome).await;
        }
        outcome
    }

    /// Only the confirmation is repeated; partner and sales order already exist.
    async fn retry_confirm(&self, order: &Order, erp_order_id: i64) -> PropagationOutcome {
        let mut outcome = PropagationOutcome::new(order.id, PropagationStatus::Propagated);
        outcome.erp_order_id = Some(erp_order_id);
        outcome.partner_id = order.metadata.get(META_ERP_PARTNER_ID).and_then(Value::as_i64);
        outcome.unmatched_skus = order.metadata.get(META_ERP_UNMATCHED_SKUS)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        info!(order_id = %order.id, erp_order_id, "Retrying ERP sales order confirmation");
        self.confirm(order, erp_order_id, &mut outcome).await;
        outcome
    }

    async fn confirm(&self, order: &Order, erp_order_id: i64, outcome: &mut PropagationOutcome) {
        match self.erp.confirm_sales_order(erp_order_id).await {
            Ok(confirmed) => outcome.confirmed = confirmed,
            Err(e) => {
                // The sales order exists; only the confirmation is missing.
                warn!(order_id = %order.id, erp_order_id, error = %e, "Could not confirm ERP sales order");
                outcome.failed_step = Some(PropagationStep::Confirm);
                outcome.error = Some(e.to_string());
            }
        }
    }

    async fn resolve_partner(&self, order: &Order) -> Result<i64, ErpError> {
        let email = order.email.trim();
        if !email.is_empty() {
            if let Some(id) = self.erp.find_partner_by_email(email).await? {
                return Ok(id);
            }
        }
        let address = order.shipping_address.clone().unwrap_or_default();
        let name = address.full_name()
            .or_else(|| address.company.clone())
            .unwrap_or_else(|| if email.is_empty() { order.order_number.clone() } else { email.to_string() });
        let info = PartnerInfo {
            name,
            email: email.to_string(),
            phone: address.phone,
            street: address.address1,
            street2: address.address2,
            city: address.city,
            zip: address.postal_code,
            country_code: address.country_code,
        };
        let id = self.erp.create_partner(&info).await?;
        info!(order_id = %order.id, partner_id = id, "Created ERP partner");
        Ok(id)
    }

    /// One ERP line per order line; lines whose SKU has no ERP product become notes.
    async fn build_lines(&self, order: &Order) -> Result<Vec<SalesOrderLine>, ErpError> {
        let mut lines = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let sku = item.sku.as_deref().map(str::trim).filter(|s| !s.is_empty());
            let product_id = match sku {
                Some(sku) => self.match_product(sku).await?,
                None => None,
            };
            let description = match (product_id, sku) {
                (Some(_), _) => item.title.clone(),
                (None, Some(sku)) => format!("[UNMATCHED] {} (SKU: {sku})", item.title),
                (None, None) => format!("[UNMATCHED] {}", item.title),
            };
            lines.push(SalesOrderLine { product_id, description, quantity: item.quantity, unit_price: item.unit_price });
        }
        Ok(lines)
    }

    async fn match_product(&self, sku: &str) -> Result<Option<ExternalId>, ErpError> {
        if let Some(id) = Sku::new(sku).ok().and_then(|s| s.embedded_external_id()) {
            return Ok(Some(id));
        }
        match self.erp.find_product_by_sku(sku).await {
            Ok(found) => Ok(found),
            Err(e @ ErpError::Remote { .. }) => {
                warn!(sku, error = %e, "ERP product lookup faulted; sending line unmatched");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn record(&self, order: &Order, outcome: &PropagationOutcome) {
        let mut patch = Map::new();
        patch.insert(META_ERP_SYNCED_AT.into(), json!(Utc::now().to_rfc3339()));
        match outcome.status {
            PropagationStatus::Propagated => {
                patch.insert(META_ERP_SYNC_STATUS.into(), json!("propagated"));
                patch.insert(META_ERP_ORDER_ID.into(), json!(outcome.erp_order_id));
                patch.insert(META_ERP_PARTNER_ID.into(), json!(outcome.partner_id));
                patch.insert(META_ERP_CONFIRMED.into(), json!(outcome.confirmed));
                patch.insert(META_ERP_UNMATCHED_SKUS.into(), json!(outcome.unmatched_skus));
                patch.insert(META_ERP_FAILED_STEP.into(), outcome.failed_step.map_or(Value::Null, |s| json!(s.as_str())));
                patch.insert(META_ERP_ERROR.into(), outcome.error.as_ref().map_or(Value::Null, |e| json!(e)));
            }
            PropagationStatus::Failed | PropagationStatus::Skipped => {
                patch.insert(META_ERP_SYNC_STATUS.into(), json!("failed"));
                patch.insert(META_ERP_FAILED_STEP.into(), json!(outcome.failed_step.map(|s| s.as_str())));
                patch.insert(META_ERP_ERROR.into(), json!(outcome.error));
            }
        }

        if let Err(e) = self.repos.orders.merge_metadata(order.id, patch).await {
            error!(order_id = %order.id, error = %e, "Could not record ERP propagation on order");
        }

        match (outcome.status, outcome.erp_order_id) {
            (PropagationStatus::Propagated, Some(erp_order_id)) => {
                info!(order_id = %order.id, erp_order_id, unmatched = outcome.unmatched_skus.len(), "Order propagated to ERP");
                self.publisher.publish(&DomainEvent::OrderPropagated {
                    order_id: order.id, erp_order_id, unmatched_lines: outcome.unmatched_skus.len(), confirmed: outcome.confirmed,
                }).await;
            }
            _ => {
                let step = outcome.failed_step.map_or("unknown", |s| s.as_str());
                let reason = outcome.error.clone().unwrap_or_default();
                warn!(order_id = %order.id, step, reason, "Order propagation failed");
                self.publisher.publish(&DomainEvent::OrderPropagationFailed { order_id: order.id, step: step.to_string(), reason }).await;
            }
        }
    }
}

/// A sales order exists but its confirmation failed.
fn confirm_pending(order: &Order) -> bool {
    order.metadata_str(META_ERP_FAILED_STEP) == Some(PropagationStep::Confirm.as_str())
}

#[derive(Debug, Deserialize)]
struct OrderPlaced { order_id: Uuid }

/// Propagate every order announced on [`ORDER_PLACED_SUBJECT`] until shutdown.
pub async fn listen_for_placed_orders(client: async_nats::Client, propagator: Arc<OrderPropagator>, shutdown: CancellationToken) {
    let mut subscriber = match client.subscribe(ORDER_PLACED_SUBJECT.to_string()).await {
        Ok(subscriber) => subscriber,
        Err(e) => {
            error!(error = %e, subject = ORDER_PLACED_SUBJECT, "Could not subscribe to order events");
            return;
        }
    };
    info!(subject = ORDER_PLACED_SUBJECT, "Listening for placed orders");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            message = subscriber.next() => {
                let Some(message) = message else { break };
                match serde_json::from_slice::<OrderPlaced>(&message.payload) {
                    Ok(event) => { propagator.spawn(event.order_id); }
                    Err(e) => warn!(error = %e, "Ignoring malformed order event"),
                }
            }
        }
    }
    info!("Order listener stopped");
}
