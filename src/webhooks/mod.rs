//! Webhook Ingestor
//!
//! Push notifications from the ERP, applied directly and independently of the
//! poll cycle. Every event moves `received → validated → applied | rejected`.
//! A payload that fails validation is rejected before anything is written.
//! Writes go through the same reconcilers and per-key locks as the scheduled
//! jobs.
//!
//! Delta inventory events are not de-duplicated: a replayed delta is applied
//! again. Senders must not re-deliver delta events they already had accepted.

pub mod payload;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{AdjustmentMode, AdjustmentStatus, InventoryAdjustment, Order, PerItemResult};
use crate::domain::events::DomainEvent;
use crate::domain::{ExternalRecord, RecordOutcome, RunMode};
use crate::error::{Result, SyncError};
use crate::publisher::EventPublisher;
use crate::store::{Repositories, StoreError};
use crate::sync::catalog::{ApplyOptions, CatalogReconciler};
use crate::sync::inventory::InventoryReconciler;
use crate::sync::locks::KeyedLocks;

pub use payload::{InventoryWebhook, OrderStatusWebhook, ProductWebhook};

pub const INVENTORY_EVENTS: &[&str] = &["inventory.updated", "inventory.adjusted", "stock.changed"];
pub const ORDER_STATUS_EVENTS: &[&str] = &["order.confirmed", "order.shipped", "order.delivered", "order.cancelled", "order.invoiced"];
pub const PRODUCT_EVENTS: &[&str] = &["product.created", "product.updated", "product.deactivated"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState { Received, Validated, Applied, Rejected }

impl IngestState {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Received => "received", Self::Validated => "validated", Self::Applied => "applied", Self::Rejected => "rejected" }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookEndpoint { Inventory, OrderStatus, Products }

impl WebhookEndpoint {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Inventory => "inventory", Self::OrderStatus => "order-status", Self::Products => "products" }
    }

    pub fn supported_events(&self) -> &'static [&'static str] {
        match self { Self::Inventory => INVENTORY_EVENTS, Self::OrderStatus => ORDER_STATUS_EVENTS, Self::Products => PRODUCT_EVENTS }
    }
}

/// Answer to `GET` on a webhook path.
#[derive(Debug, Serialize)]
pub struct WebhookDescriptor {
    pub status: &'static str,
    pub endpoint: String,
    pub supported_events: &'static [&'static str],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustment_types: Option<[&'static str; 2]>,
}

pub fn descriptor(endpoint: WebhookEndpoint) -> WebhookDescriptor {
    WebhookDescriptor {
        status: "ok",
        endpoint: format!("/webhooks/{}", endpoint.as_str()),
        supported_events: endpoint.supported_events(),
        adjustment_types: (endpoint == WebhookEndpoint::Inventory).then_some(AdjustmentMode::ALL),
    }
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct InventorySummary {
    pub total: usize,
    pub success: usize,
    pub created: usize,
    pub not_found: usize,
    pub failed: usize,
}

impl InventorySummary {
    fn of(results: &[PerItemResult]) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        Self {
            total: results.len(),
            success: count(AdjustmentStatus::Success),
            created: results.iter().filter(|r| r.created).count(),
            not_found: count(AdjustmentStatus::NotFound),
            failed: count(AdjustmentStatus::Failed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InventoryWebhookResponse {
    pub state: IngestState,
    pub event_type: String,
    pub results: Vec<PerItemResult>,
    pub summary: InventorySummary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusOutcome { Updated, NotFound }

#[derive(Debug, Serialize)]
pub struct OrderStatusResponse {
    pub state: IngestState,
    pub event_type: String,
    pub outcome: OrderStatusOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    pub erp_status: String,
    pub updated_keys: Vec<String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct ProductWebhookResponse {
    pub state: IngestState,
    pub event_type: String,
    pub external_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RecordOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct WebhookIngestor {
    catalog: Arc<CatalogReconciler>,
    inventory: Arc<InventoryReconciler>,
    repos: Repositories,
    locks: KeyedLocks,
    publisher: EventPublisher,
}

impl WebhookIngestor {
    pub fn new(
        catalog: Arc<CatalogReconciler>, inventory: Arc<InventoryReconciler>, repos: Repositories,
        locks: KeyedLocks, publisher: EventPublisher,
    ) -> Self {
        Self { catalog, inventory, repos, locks, publisher }
    }

    pub async fn ingest_inventory(&self, payload: InventoryWebhook) -> Result<InventoryWebhookResponse> {
        trace_state(WebhookEndpoint::Inventory, &payload.event_type, IngestState::Received);
        let adjustments = self.checked(WebhookEndpoint::Inventory, &payload.event_type, validate_inventory(&payload))?;
        trace_state(WebhookEndpoint::Inventory, &payload.event_type, IngestState::Validated);

        let results = self.inventory.sync_inventory(&adjustments).await;
        let summary = InventorySummary::of(&results);
        info!(
            endpoint = "inventory", event_type = %payload.event_type, state = IngestState::Applied.as_str(),
            total = summary.total, success = summary.success, not_found = summary.not_found, failed = summary.failed,
            "Webhook applied"
        );
        self.published(WebhookEndpoint::Inventory, &payload.event_type, summary.success, summary.failed).await;
        Ok(InventoryWebhookResponse { state: IngestState::Applied, event_type: payload.event_type, results, summary })
    }

    pub async fn ingest_order_status(&self, payload: OrderStatusWebhook) -> Result<OrderStatusResponse> {
        let endpoint = WebhookEndpoint::OrderStatus;
        trace_state(endpoint, &payload.event_type, IngestState::Received);
        let target = self.checked(endpoint, &payload.event_type, validate_order_status(&payload))?;
        trace_state(endpoint, &payload.event_type, IngestState::Validated);

        let order = match &target.locator {
            OrderLocator::Local(id) => self.repos.orders.find(*id).await?,
            OrderLocator::External(id) => self.repos.orders.find_by_erp_order_id(&id.to_string()).await?,
        };
        let Some(order) = order else {
            info!(endpoint = endpoint.as_str(), event_type = %payload.event_type, locator = ?target.locator, "Webhook order not found");
            return Ok(OrderStatusResponse {
                state: IngestState::Applied, event_type: payload.event_type, outcome: OrderStatusOutcome::NotFound,
                order_id: None, erp_status: target.status, updated_keys: vec![], metadata: Map::new(),
            });
        };

        let patch = status_patch(&payload, &target);
        let updated_keys: Vec<String> = patch.keys().cloned().collect();
        let updated = {
            let _guard = self.locks.lock(KeyedLocks::order_key(order.id)).await;
            self.repos.orders.merge_metadata(order.id, patch).await?
        };
        let metadata = subset(&updated, &updated_keys);

        info!(
            endpoint = endpoint.as_str(), event_type = %payload.event_type, order_id = %order.id,
            erp_status = %target.status, state = IngestState::Applied.as_str(), "Webhook applied"
        );
        self.published(endpoint, &payload.event_type, 1, 0).await;
        Ok(OrderStatusResponse {
            state: IngestState::Applied, event_type: payload.event_type, outcome: OrderStatusOutcome::Updated,
            order_id: Some(order.id), erp_status: target.status, updated_keys, metadata,
        })
    }

    pub async fn ingest_product(&self, payload: ProductWebhook) -> Result<ProductWebhookResponse> {
        let endpoint = WebhookEndpoint::Products;
        trace_state(endpoint, &payload.event_type, IngestState::Received);
        let (record, stock_known) = self.checked(endpoint, &payload.event_type, validate_product(&payload))?;
        trace_state(endpoint, &payload.event_type, IngestState::Validated);

        let options = ApplyOptions {
            toggles: self.catalog.config().fields,
            mode: RunMode::Execute,
            stock_known,
            from_webhook: true,
        };
        let external_id = record.external_id.value();
        match self.catalog.apply_record(&record, options).await {
            Ok(outcome) => {
                info!(
                    endpoint = endpoint.as_str(), event_type = %payload.event_type, external_id,
                    ?outcome, state = IngestState::Applied.as_str(), "Webhook applied"
                );
                self.published(endpoint, &payload.event_type, 1, 0).await;
                Ok(ProductWebhookResponse {
                    state: IngestState::Applied, event_type: payload.event_type, external_id, outcome: Some(outcome), error: None,
                })
            }
            Err(e @ (SyncError::Store(StoreError::Conflict(_)) | SyncError::NotFound(_))) => {
                warn!(
                    endpoint = endpoint.as_str(), event_type = %payload.event_type, external_id, error = %e,
                    state = IngestState::Rejected.as_str(), "Webhook rejected"
                );
                self.published(endpoint, &payload.event_type, 0, 1).await;
                Ok(ProductWebhookResponse {
                    state: IngestState::Rejected, event_type: payload.event_type, external_id, outcome: None, error: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Log the rejection and turn validation problems into a [`SyncError::Validation`].
    fn checked<T>(&self, endpoint: WebhookEndpoint, event_type: &str, validated: std::result::Result<T, Rejection>) -> Result<T> {
        validated.map_err(|rejection| {
            warn!(
                endpoint = endpoint.as_str(), event_type, state = IngestState::Rejected.as_str(),
                details = ?rejection.details, "{}", rejection.message
            );
            SyncError::validation(rejection.message, rejection.details)
        })
    }

    async fn published(&self, endpoint: WebhookEndpoint, event_type: &str, applied: usize, rejected: usize) {
        self.publisher.publish(&DomainEvent::WebhookApplied {
            endpoint: endpoint.as_str().to_string(), event_type: event_type.to_string(),
            applied: applied as u32, rejected: rejected as u32,
        }).await;
    }
}

fn trace_state(endpoint: WebhookEndpoint, event_type: &str, state: IngestState) {
    debug!(endpoint = endpoint.as_str(), event_type, state = state.as_str(), "Webhook state");
}

struct Rejection {
    message: String,
    details: Vec<String>,
}

impl Rejection {
    fn invalid(details: Vec<String>) -> Self { Self { message: "invalid webhook payload".into(), details } }

    fn unsupported(event_type: &str, supported: &[&str]) -> Self {
        Self {
            message: format!("unsupported event type '{event_type}'"),
            details: supported.iter().map(|e| format!("supported: {e}")).collect(),
        }
    }
}

fn check_event(event_type: &str, supported: &[&str]) -> std::result::Result<(), Rejection> {
    if event_type.trim().is_empty() {
        return Err(Rejection::invalid(vec!["event_type: event_type is required".into()]));
    }
    if !supported.contains(&event_type) {
        return Err(Rejection::unsupported(event_type, supported));
    }
    Ok(())
}

fn validate_inventory(payload: &InventoryWebhook) -> std::result::Result<Vec<InventoryAdjustment>, Rejection> {
    check_event(&payload.event_type, INVENTORY_EVENTS)?;
    if let Err(errors) = payload.validate() {
        return Err(Rejection::invalid(payload::describe(&errors)));
    }

    let mut details = vec![];
    let mut adjustments = Vec::with_capacity(payload.items.len());
    for (i, item) in payload.items.iter().enumerate() {
        let sku = item.sku.as_deref().map(str::trim).filter(|s| !s.is_empty());
        if sku.is_none() {
            details.push(format!("items[{i}].sku: sku is required"));
        }
        let quantity = item.quantity.as_ref().and_then(payload::parse_quantity);
        if quantity.is_none() {
            details.push(format!("items[{i}].quantity: a numeric quantity is required"));
        }
        let mode = match item.adjustment_type.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => Some(AdjustmentMode::Absolute),
            Some(raw) => {
                let mode = AdjustmentMode::parse(raw);
                if mode.is_none() {
                    details.push(format!("items[{i}].adjustment_type: must be one of {}", AdjustmentMode::ALL.join(", ")));
                }
                mode
            }
        };
        if let (Some(sku), Some(quantity), Some(mode)) = (sku, quantity, mode) {
            adjustments.push(InventoryAdjustment { sku: sku.to_string(), quantity, mode, reason: item.reason.clone() });
        }
    }
    if details.is_empty() { Ok(adjustments) } else { Err(Rejection::invalid(details)) }
}

#[derive(Debug)]
enum OrderLocator { Local(Uuid), External(i64) }

struct StatusTarget {
    locator: OrderLocator,
    external_order_id: Option<i64>,
    status: String,
}

fn validate_order_status(payload: &OrderStatusWebhook) -> std::result::Result<StatusTarget, Rejection> {
    check_event(&payload.event_type, ORDER_STATUS_EVENTS)?;
    let Some(order) = &payload.order else {
        return Err(Rejection::invalid(vec!["order: order is required".into()]));
    };
    let mut details = match order.validate() {
        Ok(()) => vec![],
        Err(errors) => payload::describe(&errors).into_iter().map(|d| format!("order.{d}")).collect(),
    };

    let local = match order.local_order_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                details.push("order.local_order_id: must be a UUID".into());
                None
            }
        },
    };
    let external = match &order.external_order_id {
        None | Some(Value::Null) => None,
        Some(value) => match erp_order_id(value) {
            Some(id) => Some(id),
            None => {
                details.push("order.external_order_id: must be an integer ERP order id".into());
                None
            }
        },
    };
    if !details.is_empty() {
        return Err(Rejection::invalid(details));
    }

    let locator = match (local, &external) {
        (Some(id), _) => OrderLocator::Local(id),
        (None, Some(ext)) => OrderLocator::External(*ext),
        (None, None) => return Err(Rejection::invalid(vec!["order: local_order_id or external_order_id is required".into()])),
    };
    let status = payload.event_type.trim_start_matches("order.").to_string();
    Ok(StatusTarget { locator, external_order_id: external, status })
}

/// Metadata keys written for an order-status event. The order's own status is never part of it.
fn status_patch(payload: &OrderStatusWebhook, target: &StatusTarget) -> Map<String, Value> {
    let order = payload.order.clone().unwrap_or_default();
    let at = order.occurred_at.unwrap_or_else(Utc::now);
    let mut patch = Map::new();
    patch.insert("erp_status".into(), json!(target.status));
    patch.insert(format!("erp_{}_at", target.status), json!(at.to_rfc3339()));
    patch.insert("erp_last_event".into(), json!(payload.event_type));
    if let Some(ext) = &target.external_order_id { patch.insert("erp_order_id".into(), json!(ext)); }
    if let Some(tracking) = non_empty(order.tracking_number) { patch.insert("tracking_number".into(), json!(tracking)); }
    if let Some(carrier) = non_empty(order.carrier) { patch.insert("carrier".into(), json!(carrier)); }
    if let Some(note) = non_empty(order.note) { patch.insert("erp_note".into(), json!(note)); }
    patch
}

/// ERP sales order ids are integers; numeric strings are accepted.
fn erp_order_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn subset(order: &Order, keys: &[String]) -> Map<String, Value> {
    keys.iter().filter_map(|k| order.metadata.get(k).map(|v| (k.clone(), v.clone()))).collect()
}

fn validate_product(payload: &ProductWebhook) -> std::result::Result<(ExternalRecord, bool), Rejection> {
    check_event(&payload.event_type, PRODUCT_EVENTS)?;
    let Some(product) = &payload.product else {
        return Err(Rejection::invalid(vec!["product: product is required".into()]));
    };
    let mut details = match product.validate() {
        Ok(()) => vec![],
        Err(errors) => payload::describe(&errors).into_iter().map(|d| format!("product.{d}")).collect(),
    };
    if product.external_id.is_none() {
        details.push("product.external_id: external_id is required".into());
    }
    let deactivation = payload.event_type == "product.deactivated";
    let name = product.name.as_deref().map(str::trim).unwrap_or_default();
    if !deactivation && name.is_empty() {
        details.push("product.name: name is required".into());
    }
    let stock = match &product.stock_quantity {
        None | Some(Value::Null) => None,
        Some(raw) => {
            let parsed = payload::parse_quantity(raw);
            if parsed.is_none() { details.push("product.stock_quantity: must be numeric".into()); }
            parsed
        }
    };
    if !details.is_empty() {
        return Err(Rejection::invalid(details));
    }

    let mut record = ExternalRecord::new(product.external_id.unwrap_or_default(), name);
    record.sku = non_empty(product.sku.clone());
    record.description = non_empty(product.description.clone());
    record.price = product.price.unwrap_or(Decimal::ZERO);
    record.stock_quantity = stock.unwrap_or(0);
    record.category_ref = non_empty(product.category.clone());
    record.barcode = non_empty(product.barcode.clone());
    record.active = !deactivation && product.active.unwrap_or(true);
    record.raw_image = non_empty(product.image.clone());
    record.modified_at = Some(Utc::now());
    let stock_known = stock.is_some() || !record.active;
    Ok((record, stock_known))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::OrderStatus;
    use crate::store::OrderRepository;
    use crate::sync::catalog::RunRequest;
    use crate::test_support::{FakeErp, Harness};
    use tokio_util::sync::CancellationToken;

    fn inventory(event_type: &str, items: Value) -> InventoryWebhook {
        serde_json::from_value(json!({"event_type": event_type, "items": items})).unwrap()
    }

    #[tokio::test]
    async fn test_inventory_event_creates_missing_record() {
        let h = Harness::new(FakeErp::default());
        let response = h.webhooks.ingest_inventory(inventory("inventory.updated", json!([{"sku": "NEW-1", "quantity": 15}]))).await.unwrap();
        assert_eq!(response.state, IngestState::Applied);
        assert_eq!(response.results[0].status, AdjustmentStatus::Success);
        assert!(response.results[0].created);
        assert_eq!(response.summary, InventorySummary { total: 1, success: 1, created: 1, not_found: 0, failed: 0 });
        assert_eq!(h.store.stock("NEW-1", "default").await, Some(15));
    }

    #[tokio::test]
    async fn test_modes_default_to_absolute_and_delta_floors() {
        let h = Harness::new(FakeErp::default());
        h.webhooks.ingest_inventory(inventory("stock.changed", json!([{"sku": "A", "quantity": 10}]))).await.unwrap();
        h.webhooks.ingest_inventory(inventory("inventory.adjusted", json!([{"sku": "A", "quantity": -4, "adjustment_type": "delta"}]))).await.unwrap();
        assert_eq!(h.store.stock("A", "default").await, Some(6));
        h.webhooks.ingest_inventory(inventory("inventory.adjusted", json!([{"sku": "A", "quantity": "-40", "adjustment_type": "delta"}]))).await.unwrap();
        assert_eq!(h.store.stock("A", "default").await, Some(0));

        // Replaying an absolute event converges.
        for _ in 0..2 {
            h.webhooks.ingest_inventory(inventory("inventory.updated", json!([{"sku": "A", "quantity": 3}]))).await.unwrap();
        }
        assert_eq!(h.store.stock("A", "default").await, Some(3));
    }

    #[tokio::test]
    async fn test_invalid_item_rejects_the_whole_batch() {
        let h = Harness::new(FakeErp::default());
        let err = h.webhooks.ingest_inventory(inventory("inventory.updated", json!([
            {"sku": "GOOD", "quantity": 1},
            {"quantity": 2},
            {"sku": "BAD", "quantity": "lots", "adjustment_type": "sideways"},
        ]))).await.unwrap_err();
        match err {
            SyncError::Validation { details, .. } => {
                assert!(details.contains(&"items[1].sku: sku is required".to_string()));
                assert!(details.iter().any(|d| d.starts_with("items[2].quantity")));
                assert!(details.iter().any(|d| d.starts_with("items[2].adjustment_type")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(h.store.stock("GOOD", "default").await, None);
    }

    #[tokio::test]
    async fn test_unknown_event_lists_supported_types() {
        let h = Harness::new(FakeErp::default());
        let err = h.webhooks.ingest_inventory(inventory("inventory.exploded", json!([{"sku": "A", "quantity": 1}]))).await.unwrap_err();
        match err {
            SyncError::Validation { message, details } => {
                assert!(message.contains("inventory.exploded"));
                assert_eq!(details.len(), INVENTORY_EVENTS.len());
                assert!(details.contains(&"supported: stock.changed".to_string()));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_sku_is_not_found_when_creation_disabled() {
        let mut config = crate::config::SyncConfig::default();
        config.create_missing_inventory = false;
        let h = Harness::with_config(FakeErp::default(), config);
        let response = h.webhooks.ingest_inventory(inventory("inventory.updated", json!([{"sku": "GHOST", "quantity": 1}]))).await.unwrap();
        assert_eq!(response.results[0].status, AdjustmentStatus::NotFound);
        assert_eq!(response.summary.not_found, 1);
        assert_eq!(response.summary.failed, 0);
    }

    async fn placed_order(h: &Harness) -> Order {
        let mut order = Order::create("ORD-7", "c@example.com", "USD");
        order.add_item("Mouse", Some("X-1"), 1, Decimal::new(999, 2));
        order.place().unwrap();
        order.metadata.insert("erp_order_id".into(), json!(4242));
        OrderRepository::insert(h.store.as_ref(), &order).await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_order_status_updates_metadata_only() {
        let h = Harness::new(FakeErp::default());
        let order = placed_order(&h).await;
        let payload: OrderStatusWebhook = serde_json::from_value(json!({
            "event_type": "order.shipped",
            "order": {"external_order_id": 4242, "tracking_number": "1Z999", "carrier": "UPS", "occurred_at": "2024-03-01T10:00:00Z"}
        })).unwrap();

        let response = h.webhooks.ingest_order_status(payload).await.unwrap();
        assert_eq!(response.outcome, OrderStatusOutcome::Updated);
        assert_eq!(response.order_id, Some(order.id));
        assert_eq!(response.metadata["tracking_number"], json!("1Z999"));

        let stored = OrderRepository::find(h.store.as_ref(), order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Placed);
        assert_eq!(stored.metadata["erp_status"], json!("shipped"));
        assert_eq!(stored.metadata["erp_shipped_at"], json!("2024-03-01T10:00:00+00:00"));
        assert_eq!(stored.metadata["carrier"], json!("UPS"));
    }

    #[tokio::test]
    async fn test_order_status_lookup_by_local_id_and_not_found() {
        let h = Harness::new(FakeErp::default());
        let order = placed_order(&h).await;
        let by_local: OrderStatusWebhook = serde_json::from_value(json!({
            "event_type": "order.delivered", "order": {"local_order_id": order.id.to_string()}
        })).unwrap();
        assert_eq!(h.webhooks.ingest_order_status(by_local).await.unwrap().outcome, OrderStatusOutcome::Updated);

        let missing: OrderStatusWebhook = serde_json::from_value(json!({
            "event_type": "order.delivered", "order": {"external_order_id": "999"}
        })).unwrap();
        let response = h.webhooks.ingest_order_status(missing).await.unwrap();
        assert_eq!(response.outcome, OrderStatusOutcome::NotFound);

        let no_target: OrderStatusWebhook = serde_json::from_value(json!({"event_type": "order.delivered", "order": {}})).unwrap();
        assert!(matches!(h.webhooks.ingest_order_status(no_target).await, Err(SyncError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_erp_order_id_is_stored_as_a_number() {
        let h = Harness::new(FakeErp::default());
        let order = placed_order(&h).await;
        let as_string: OrderStatusWebhook = serde_json::from_value(json!({
            "event_type": "order.invoiced", "order": {"external_order_id": " 4242 "}
        })).unwrap();
        assert_eq!(h.webhooks.ingest_order_status(as_string).await.unwrap().outcome, OrderStatusOutcome::Updated);
        let stored = OrderRepository::find(h.store.as_ref(), order.id).await.unwrap().unwrap();
        assert_eq!(stored.metadata["erp_order_id"], json!(4242));

        let reference: OrderStatusWebhook = serde_json::from_value(json!({
            "event_type": "order.invoiced", "order": {"external_order_id": "SO042"}
        })).unwrap();
        assert!(matches!(h.webhooks.ingest_order_status(reference).await, Err(SyncError::Validation { .. })));
    }

    fn product(event_type: &str, product: Value) -> ProductWebhook {
        serde_json::from_value(json!({"event_type": event_type, "product": product})).unwrap()
    }

    #[tokio::test]
    async fn test_product_webhook_shares_the_poll_path() {
        let erp = FakeErp::with_products(vec![ExternalRecord::new(501, "Wireless Mouse").with_sku("X-1").with_stock(12)]);
        let h = Harness::new(erp);

        let created = h.webhooks.ingest_product(product("product.created", json!({"external_id": 501, "sku": "X-1", "name": "Wireless Mouse", "stock_quantity": 12}))).await.unwrap();
        assert_eq!(created.outcome, Some(RecordOutcome::Created));
        assert_eq!(h.store.stock("X-1", "default").await, Some(12));

        // The scheduled run finds the webhook-created item through the ledger.
        let run = h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert_eq!((run.created, run.updated), (0, 1));
        assert_eq!(h.store.item_count().await, 1);

        let updated = h.webhooks.ingest_product(product("product.updated", json!({"id": 501, "default_code": "X-1", "name": "Wireless Mouse"}))).await.unwrap();
        assert_eq!(updated.outcome, Some(RecordOutcome::Updated));
        assert_eq!(h.store.stock("X-1", "default").await, Some(12));

        let gone = h.webhooks.ingest_product(product("product.deactivated", json!({"external_id": 501, "sku": "X-1"}))).await.unwrap();
        assert_eq!(gone.state, IngestState::Applied);
        assert!(!h.store.items().await[0].is_published());
        assert_eq!(h.store.items().await[0].title, "Wireless Mouse");
        assert_eq!(h.store.stock("X-1", "default").await, Some(0));
    }

    #[tokio::test]
    async fn test_product_webhook_validation_and_conflict() {
        let h = Harness::new(FakeErp::default());
        let err = h.webhooks.ingest_product(product("product.created", json!({"sku": "Q"}))).await.unwrap_err();
        match err {
            SyncError::Validation { details, .. } => {
                assert!(details.contains(&"product.external_id: external_id is required".to_string()));
                assert!(details.contains(&"product.name: name is required".to_string()));
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        h.webhooks.ingest_product(product("product.created", json!({"external_id": 1, "sku": "DUP", "name": "One"}))).await.unwrap();
        let clash = h.webhooks.ingest_product(product("product.created", json!({"external_id": 2, "sku": "DUP", "name": "Two"}))).await.unwrap();
        assert_eq!(clash.state, IngestState::Rejected);
        assert!(clash.error.unwrap().contains("DUP"));
        assert_eq!(h.store.item_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_webhook_and_poll_do_not_duplicate() {
        let erp = FakeErp::with_products(vec![ExternalRecord::new(77, "Lamp").with_sku("L-77").with_stock(3)]);
        let h = Arc::new(Harness::new(erp));
        let (a, b) = (h.clone(), h.clone());
        let webhook = tokio::spawn(async move {
            a.webhooks.ingest_product(product("product.updated", json!({"external_id": 77, "sku": "L-77", "name": "Lamp", "stock_quantity": 3}))).await.unwrap()
        });
        let poll = tokio::spawn(async move { b.catalog.run(&RunRequest::default(), &CancellationToken::new()).await });
        webhook.await.unwrap();
        let run = poll.await.unwrap();
        assert_eq!(run.failed, 0);
        assert_eq!(h.store.item_count().await, 1);
        assert_eq!(h.store.ledger_len().await, 1);
    }

    #[test]
    fn test_descriptors() {
        let inv = serde_json::to_value(descriptor(WebhookEndpoint::Inventory)).unwrap();
        assert_eq!(inv["endpoint"], json!("/webhooks/inventory"));
        assert_eq!(inv["adjustment_types"], json!(["absolute", "delta"]));
        let orders = serde_json::to_value(descriptor(WebhookEndpoint::OrderStatus)).unwrap();
        assert!(orders.get("adjustment_types").is_none());
        assert_eq!(orders["supported_events"].as_array().unwrap().len(), 5);
    }
}
