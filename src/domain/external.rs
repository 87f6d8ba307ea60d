//! Snapshots of ERP data as seen through the ERP client.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{ExternalId, Sku};

/// One ERP product as returned by a single fetch. Never mutated after fetch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub external_id: ExternalId,
    pub sku: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock_quantity: i64,
    pub category_ref: Option<String>,
    pub barcode: Option<String>,
    pub active: bool,
    /// Base64 image payload, when the ERP sent one.
    #[serde(default, skip_serializing)]
    pub raw_image: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl ExternalRecord {
    pub fn new(external_id: impl Into<ExternalId>, name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(), sku: None, name: name.into(), description: None,
            price: Decimal::ZERO, stock_quantity: 0, category_ref: None, barcode: None,
            active: true, raw_image: None, modified_at: None,
        }
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self { self.sku = Some(sku.into()); self }
    pub fn with_stock(mut self, qty: i64) -> Self { self.stock_quantity = qty; self }
    pub fn with_description(mut self, d: impl Into<String>) -> Self { self.description = Some(d.into()); self }
    pub fn inactive(mut self) -> Self { self.active = false; self }

    /// The SKU present on the record, if non-empty.
    pub fn declared_sku(&self) -> Option<&str> {
        self.sku.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// The SKU the catalog uses for this record, synthesising `EXT-<id>` when absent.
    pub fn effective_sku(&self) -> Sku { Sku::for_external(self.declared_sku(), self.external_id) }
}

/// Counterparty data used to create an ERP partner.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartnerInfo {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub street2: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub country_code: Option<String>,
}

/// One line of an ERP sales document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SalesOrderLine {
    /// `None` when the line's SKU could not be matched to an ERP product.
    pub product_id: Option<ExternalId>,
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl SalesOrderLine {
    pub fn is_matched(&self) -> bool { self.product_id.is_some() }
}

/// Header of an ERP sales document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SalesOrderDraft {
    pub partner_id: i64,
    pub client_reference: String,
    pub note: Option<String>,
    pub lines: Vec<SalesOrderLine>,
}
