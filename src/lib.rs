//! OpenSASE ERP Sync
//!
//! Keeps the storefront catalog, inventory and orders reconciled with an
//! external ERP.
//!
//! ## Features
//! - Scheduled and manual catalog reconciliation with stable identity mapping
//! - Absolute and delta inventory adjustments with per-SKU serialisation
//! - Fire-and-forget order propagation into ERP sales documents
//! - Inventory, order-status and product webhooks
//! - Sync ledger of every ERP record linked to a catalog item

pub mod api;
pub mod config;
pub mod domain;
pub mod erp;
pub mod error;
pub mod publisher;
pub mod store;
pub mod sync;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
