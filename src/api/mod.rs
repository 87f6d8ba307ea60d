//! HTTP surface: manual triggers, status, webhooks and order propagation.

pub mod error;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::domain::{RunMode, SyncJob, SyncRunResult};
use crate::error::SyncError;
use crate::store::Repositories;
use crate::sync::catalog::RunRequest;
use crate::sync::orders::{OrderPropagator, PropagationOutcome};
use crate::sync::scheduler::SyncJobs;
use crate::webhooks::{
    self, InventoryWebhook, InventoryWebhookResponse, OrderStatusResponse, OrderStatusWebhook, ProductWebhook,
    ProductWebhookResponse, WebhookDescriptor, WebhookEndpoint, WebhookIngestor,
};

pub use error::{ApiError, ApiResult};

pub const SERVICE_NAME: &str = "opensase-erp-sync";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SyncConfig>,
    pub repos: Repositories,
    pub jobs: SyncJobs,
    pub webhooks: Arc<WebhookIngestor>,
    pub propagator: Arc<OrderPropagator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": SERVICE_NAME})) }))
        .route("/sync/run", post(run_catalog))
        .route("/sync/status", get(sync_status))
        .route("/sync/inventory/run", post(run_inventory))
        .route("/webhooks/inventory", get(|| describe(WebhookEndpoint::Inventory)).post(inventory_webhook))
        .route("/webhooks/order-status", get(|| describe(WebhookEndpoint::OrderStatus)).post(order_status_webhook))
        .route("/webhooks/products", get(|| describe(WebhookEndpoint::Products)).post(product_webhook))
        .route("/orders/:id/propagate", post(propagate_order))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}

/// An empty body means "all defaults".
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) { return Ok(T::default()); }
    Ok(serde_json::from_slice(body)?)
}

async fn run_catalog(State(s): State<AppState>, body: Bytes) -> ApiResult<Json<SyncRunResult>> {
    let request: RunRequest = optional_body(&body)?;
    info!(dry_run = request.dry_run, limit = ?request.limit, "Manual catalog sync requested");
    Ok(Json(s.jobs.run_catalog(request).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct InventoryRunRequest {
    #[serde(default, alias = "dryRun")]
    pub dry_run: bool,
}

async fn run_inventory(State(s): State<AppState>, body: Bytes) -> ApiResult<Json<SyncRunResult>> {
    let request: InventoryRunRequest = optional_body(&body)?;
    info!(dry_run = request.dry_run, "Manual inventory sync requested");
    Ok(Json(s.jobs.run_inventory(RunMode::from_dry_run(request.dry_run)).await?))
}

#[derive(Debug, Serialize)]
pub struct JobStatus {
    pub running: bool,
    pub last_sync_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_run: Option<SyncRunResult>,
}

async fn job_status(s: &AppState, job: SyncJob) -> ApiResult<JobStatus> {
    Ok(JobStatus {
        running: s.jobs.is_running(job),
        last_sync_at: s.repos.state.last_sync_at(job).await.map_err(SyncError::from)?,
        last_run: s.repos.state.last_run(job).await.map_err(SyncError::from)?,
    })
}

async fn sync_status(State(s): State<AppState>) -> ApiResult<Json<Value>> {
    let catalog = job_status(&s, SyncJob::Catalog).await?;
    let inventory = job_status(&s, SyncJob::Inventory).await?;
    Ok(Json(json!({ "catalog": catalog, "inventory": inventory, "config": s.config.as_ref() })))
}

async fn describe(endpoint: WebhookEndpoint) -> Json<WebhookDescriptor> { Json(webhooks::descriptor(endpoint)) }

async fn inventory_webhook(
    State(s): State<AppState>, payload: Result<Json<InventoryWebhook>, JsonRejection>,
) -> ApiResult<Json<InventoryWebhookResponse>> {
    let Json(payload) = payload?;
    Ok(Json(s.webhooks.ingest_inventory(payload).await?))
}

async fn order_status_webhook(
    State(s): State<AppState>, payload: Result<Json<OrderStatusWebhook>, JsonRejection>,
) -> ApiResult<Json<OrderStatusResponse>> {
    let Json(payload) = payload?;
    Ok(Json(s.webhooks.ingest_order_status(payload).await?))
}

async fn product_webhook(
    State(s): State<AppState>, payload: Result<Json<ProductWebhook>, JsonRejection>,
) -> ApiResult<Json<ProductWebhookResponse>> {
    let Json(payload) = payload?;
    Ok(Json(s.webhooks.ingest_product(payload).await?))
}

async fn propagate_order(State(s): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<PropagationOutcome>> {
    let id = Uuid::parse_str(id.trim())
        .map_err(|_| SyncError::validation("invalid order id", vec![format!("id: '{id}' is not a UUID")]))?;
    let order = s.repos.orders.find(id).await.map_err(SyncError::from)?
        .ok_or_else(|| SyncError::NotFound(format!("order {id}")))?;
    if !order.is_placed() {
        return Err(SyncError::validation(
            "only placed orders can be propagated",
            vec![format!("status: order is {}", order.status.as_str())],
        ).into());
    }
    info!(order_id = %id, "Manual order propagation requested");
    Ok(Json(s.propagator.on_order_placed(id).await))
}
