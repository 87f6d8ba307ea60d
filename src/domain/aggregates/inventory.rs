//! Inventory levels and adjustments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::Quantity;

/// How an adjustment's quantity is applied to the stocked level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentMode {
    /// Replace the stocked quantity.
    #[default]
    Absolute,
    /// Add to the stocked quantity, flooring at zero.
    Delta,
}

impl AdjustmentMode {
    pub const ALL: [&'static str; 2] = ["absolute", "delta"];

    pub fn as_str(&self) -> &'static str {
        match self { Self::Absolute => "absolute", Self::Delta => "delta" }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "absolute" | "set" => Some(Self::Absolute),
            "delta" | "adjust" => Some(Self::Delta),
            _ => None,
        }
    }

    /// New stocked quantity given the current one.
    pub fn apply(&self, current: Quantity, quantity: i64) -> Quantity {
        match self {
            Self::Absolute => Quantity::new(quantity),
            Self::Delta => current.apply_delta(quantity),
        }
    }
}

/// Stock of one SKU at one location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: Uuid,
    pub sku: String,
    pub location_id: String,
    pub stocked_quantity: Quantity,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    pub fn create(sku: impl Into<String>, location_id: impl Into<String>, quantity: Quantity) -> Self {
        Self { id: Uuid::now_v7(), sku: sku.into(), location_id: location_id.into(), stocked_quantity: quantity, updated_at: Utc::now() }
    }
}

/// A requested stock change for one SKU.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InventoryAdjustment {
    pub sku: String,
    pub quantity: i64,
    #[serde(default)]
    pub mode: AdjustmentMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl InventoryAdjustment {
    pub fn absolute(sku: impl Into<String>, quantity: i64) -> Self {
        Self { sku: sku.into(), quantity, mode: AdjustmentMode::Absolute, reason: None }
    }
    pub fn delta(sku: impl Into<String>, quantity: i64) -> Self {
        Self { sku: sku.into(), quantity, mode: AdjustmentMode::Delta, reason: None }
    }
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self { self.reason = Some(reason.into()); self }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus { Success, NotFound, Failed }

/// Outcome of one adjustment; independent of every other item in its batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerItemResult {
    pub sku: String,
    pub status: AdjustmentStatus,
    pub mode: AdjustmentMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_quantity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_quantity: Option<i64>,
    /// True when the record did not exist and was created by this adjustment.
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PerItemResult {
    pub fn success(sku: &str, mode: AdjustmentMode, previous: Option<Quantity>, new: Quantity, created: bool) -> Self {
        Self {
            sku: sku.to_string(), status: AdjustmentStatus::Success, mode,
            previous_quantity: previous.map(|q| q.value()), new_quantity: Some(new.value()), created, error: None,
        }
    }
    pub fn not_found(sku: &str, mode: AdjustmentMode) -> Self {
        Self { sku: sku.to_string(), status: AdjustmentStatus::NotFound, mode, previous_quantity: None, new_quantity: None, created: false, error: None }
    }
    pub fn failed(sku: &str, mode: AdjustmentMode, reason: impl Into<String>) -> Self {
        Self { sku: sku.to_string(), status: AdjustmentStatus::Failed, mode, previous_quantity: None, new_quantity: None, created: false, error: Some(reason.into()) }
    }
    pub fn is_success(&self) -> bool { self.status == AdjustmentStatus::Success }
}
