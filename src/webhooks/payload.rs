//! Inbound webhook bodies.
//!
//! Fields are deliberately loose (`Option`, raw JSON numbers) so that a
//! malformed body reaches validation and gets a field-level error list instead
//! of a bare deserialisation failure.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InventoryWebhook {
    #[serde(default)]
    #[validate(length(min = 1, max = 64, message = "event_type is required"))]
    pub event_type: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 500, message = "items must hold between 1 and 500 entries"))]
    pub items: Vec<InventoryItemPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryItemPayload {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default, alias = "qty")]
    pub quantity: Option<Value>,
    #[serde(default, alias = "mode")]
    pub adjustment_type: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OrderStatusWebhook {
    #[serde(default)]
    #[validate(length(min = 1, max = 64, message = "event_type is required"))]
    pub event_type: String,
    #[serde(default)]
    pub order: Option<OrderStatusPayload>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct OrderStatusPayload {
    #[serde(default)]
    pub local_order_id: Option<String>,
    /// ERP sales order id; a number or a string.
    #[serde(default)]
    pub external_order_id: Option<Value>,
    #[serde(default)]
    #[validate(length(max = 128))]
    pub tracking_number: Option<String>,
    #[serde(default)]
    #[validate(length(max = 128))]
    pub carrier: Option<String>,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub note: Option<String>,
    #[serde(default, alias = "timestamp")]
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProductWebhook {
    #[serde(default)]
    #[validate(length(min = 1, max = 64, message = "event_type is required"))]
    pub event_type: String,
    #[serde(default)]
    pub product: Option<ProductPayload>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProductPayload {
    #[serde(default, alias = "id")]
    #[validate(range(min = 1, message = "external_id must be positive"))]
    pub external_id: Option<i64>,
    #[serde(default, alias = "default_code")]
    #[validate(length(max = 255))]
    pub sku: Option<String>,
    #[serde(default)]
    #[validate(length(max = 512))]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "list_price")]
    pub price: Option<Decimal>,
    #[serde(default, alias = "qty_available")]
    pub stock_quantity: Option<Value>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    /// Base64 image payload.
    #[serde(default)]
    pub image: Option<String>,
}

/// Whole-unit quantity from a JSON number or numeric string. Fractions are floored.
pub fn parse_quantity(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.floor() as i64))
        }
        _ => None,
    }
}

/// Flatten validator errors into `field: message` lines.
pub fn describe(errors: &ValidationErrors) -> Vec<String> {
    let mut details: Vec<String> = errors.field_errors().into_iter().flat_map(|(field, errs)| {
        errs.iter().map(move |e| match &e.message {
            Some(message) => format!("{field}: {message}"),
            None => format!("{field}: invalid ({})", e.code),
        })
    }).collect();
    details.sort();
    details
}
