//! ERP access.
//!
//! [`ErpGateway`] is the contract every reconciler talks to. [`ErpClient`] is
//! the production implementation; it is built once from configuration and
//! shared behind an `Arc`, so all callers reuse one authenticated session.

pub mod client;
pub mod error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ExternalId, ExternalRecord, PartnerInfo, SalesOrderDraft};

pub use client::ErpClient;
pub use error::{ErpError, ErpResult};

/// An authenticated ERP session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub uid: i64,
    pub authenticated_at: DateTime<Utc>,
}

/// One page of a product fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProductQuery {
    pub limit: usize,
    pub offset: usize,
    /// Only products modified after this instant.
    pub since: Option<DateTime<Utc>>,
    pub include_images: bool,
}

#[async_trait]
pub trait ErpGateway: Send + Sync {
    async fn authenticate(&self) -> ErpResult<SessionToken>;
    async fn fetch_products(&self, query: &ProductQuery) -> ErpResult<Vec<ExternalRecord>>;
    async fn fetch_product_count(&self, since: Option<DateTime<Utc>>) -> ErpResult<u64>;
    async fn fetch_stock(&self, ids: &[ExternalId]) -> ErpResult<Vec<(ExternalId, i64)>>;
    async fn find_product_by_sku(&self, sku: &str) -> ErpResult<Option<ExternalId>>;
    async fn find_partner_by_email(&self, email: &str) -> ErpResult<Option<i64>>;
    async fn create_partner(&self, info: &PartnerInfo) -> ErpResult<i64>;
    async fn create_sales_order(&self, draft: &SalesOrderDraft) -> ErpResult<i64>;
    async fn confirm_sales_order(&self, order_id: i64) -> ErpResult<bool>;
}
