//! Reconciliation between the ERP and the local catalog.

pub mod catalog;
pub mod identity;
pub mod inventory;
pub mod locks;
pub mod orders;
pub mod scheduler;

pub use catalog::{ApplyOptions, CatalogReconciler, RunRequest};
pub use identity::{IdentityResolver, Resolution};
pub use inventory::InventoryReconciler;
pub use locks::KeyedLocks;
pub use orders::{OrderPropagator, PropagationOutcome};
pub use scheduler::{Cadence, SingleFlight, SyncJobs};
