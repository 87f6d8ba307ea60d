//! Sync Ledger entries: the durable bridge between ERP and catalog identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::ExternalId;

/// What last touched a ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventType {
    Created,
    Updated,
    Deactivated,
    Inventory,
    Webhook,
}

impl LedgerEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created", Self::Updated => "updated", Self::Deactivated => "deactivated",
            Self::Inventory => "inventory", Self::Webhook => "webhook",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "created" => Self::Created, "deactivated" => Self::Deactivated, "inventory" => Self::Inventory,
            "webhook" => Self::Webhook, _ => Self::Updated,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncLedgerEntry {
    pub external_id: ExternalId,
    pub catalog_item_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub sku: Option<String>,
    pub last_synced_at: DateTime<Utc>,
    pub last_event_type: LedgerEventType,
}

impl SyncLedgerEntry {
    pub fn link(external_id: ExternalId, catalog_item_id: Uuid, variant_id: Option<Uuid>, sku: Option<String>, at: DateTime<Utc>) -> Self {
        Self { external_id, catalog_item_id, variant_id, sku, last_synced_at: at, last_event_type: LedgerEventType::Created }
    }

    /// True when this entry points at the given catalog item.
    pub fn targets(&self, catalog_item_id: Uuid) -> bool { self.catalog_item_id == catalog_item_id }
}
