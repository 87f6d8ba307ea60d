//! Value Objects for ERP synchronisation

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of SKUs synthesised for ERP products that carry no code of their own.
pub const FALLBACK_SKU_PREFIX: &str = "EXT-";

/// Maximum length of a catalog handle.
pub const MAX_HANDLE_LEN: usize = 100;

/// ERP-assigned, immutable product identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(i64);

impl ExternalId {
    pub fn new(value: i64) -> Self { Self(value) }
    pub fn value(&self) -> i64 { self.0 }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl From<i64> for ExternalId {
    fn from(value: i64) -> Self { Self(value) }
}

/// SKU (Stock Keeping Unit) value object.
///
/// SKUs are the cross-system join key, so they are compared exactly and only
/// surrounding whitespace is removed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sku(String);

impl Sku {
    pub fn new(value: impl Into<String>) -> Result<Self, SkuError> {
        let value = value.into().trim().to_string();
        if value.is_empty() { return Err(SkuError::Empty); }
        if value.len() > 255 { return Err(SkuError::TooLong); }
        Ok(Self(value))
    }

    /// Stable SKU for an ERP product without a code: `EXT-<external_id>`.
    pub fn fallback(external_id: ExternalId) -> Self {
        Self(format!("{FALLBACK_SKU_PREFIX}{external_id}"))
    }

    /// Resolve the SKU the catalog should use for an external record.
    pub fn for_external(sku: Option<&str>, external_id: ExternalId) -> Self {
        sku.and_then(|s| Sku::new(s).ok()).unwrap_or_else(|| Self::fallback(external_id))
    }

    /// Extract the ERP id from a synthesised `EXT-<id>` SKU.
    pub fn embedded_external_id(&self) -> Option<ExternalId> {
        let digits = self.0.strip_prefix(FALLBACK_SKU_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) { return None; }
        digits.parse::<i64>().ok().map(ExternalId)
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl TryFrom<String> for Sku {
    type Error = SkuError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Sku::new(value) }
}

impl From<Sku> for String {
    fn from(sku: Sku) -> Self { sku.0 }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum SkuError { Empty, TooLong }
impl std::error::Error for SkuError {}
impl fmt::Display for SkuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "SKU empty"), Self::TooLong => write!(f, "SKU too long") }
    }
}

/// URL-safe catalog handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    /// Normalise a product name into a handle candidate.
    ///
    /// Lower-cases, collapses every run of non-alphanumeric characters into a
    /// single hyphen, trims hyphens from both ends and truncates to
    /// [`MAX_HANDLE_LEN`]. Returns `None` when nothing usable is left.
    pub fn slugify(name: &str) -> Option<Self> {
        let mut slug = String::with_capacity(name.len());
        let mut pending_hyphen = false;
        for c in name.chars().flat_map(char::to_lowercase) {
            if c.is_ascii_alphanumeric() {
                if pending_hyphen && !slug.is_empty() { slug.push('-'); }
                pending_hyphen = false;
                slug.push(c);
            } else {
                pending_hyphen = true;
            }
        }
        slug.truncate(MAX_HANDLE_LEN);
        let slug = slug.trim_end_matches('-');
        if slug.is_empty() { None } else { Some(Self(slug.to_string())) }
    }

    /// Fallback candidate for names that normalise to nothing.
    pub fn for_external(external_id: ExternalId) -> Self {
        Self(format!("item-{external_id}"))
    }

    /// The n-th collision candidate, `<base>-<n>`, kept within [`MAX_HANDLE_LEN`].
    pub fn with_suffix(&self, n: u32) -> Self {
        let suffix = format!("-{n}");
        let mut keep = MAX_HANDLE_LEN.saturating_sub(suffix.len()).min(self.0.len());
        while !self.0.is_char_boundary(keep) { keep -= 1; }
        let base = self.0[..keep].trim_end_matches('-');
        Self(format!("{base}{suffix}"))
    }

    pub fn from_stored(value: impl Into<String>) -> Self { Self(value.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Stocked quantity; never negative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(i64);

impl Quantity {
    /// Build a quantity, flooring negative input at zero.
    pub fn new(value: i64) -> Self { Self(value.max(0)) }
    pub fn value(&self) -> i64 { self.0 }
    /// Add a signed delta; the result is floored at zero.
    pub fn apply_delta(&self, delta: i64) -> Self { Self::new(self.0.saturating_add(delta)) }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sku_keeps_case() { let sku = Sku::new("  x-1 ").unwrap(); assert_eq!(sku.as_str(), "x-1"); }

    #[test]
    fn test_sku_fallback_round_trips_external_id() {
        let sku = Sku::for_external(Some("   "), ExternalId::new(501));
        assert_eq!(sku.as_str(), "EXT-501");
        assert_eq!(sku.embedded_external_id(), Some(ExternalId::new(501)));
        assert_eq!(Sku::new("EXT-").unwrap().embedded_external_id(), None);
        assert_eq!(Sku::new("EXT-12a").unwrap().embedded_external_id(), None);
        assert_eq!(Sku::new("X-1").unwrap().embedded_external_id(), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(Handle::slugify("Wireless Mouse").unwrap().as_str(), "wireless-mouse");
        assert_eq!(Handle::slugify("  --Café & Crème!! 2000 ").unwrap().as_str(), "caf-cr-me-2000");
        assert_eq!(Handle::slugify("***"), None);
    }

    #[test]
    fn test_slug_truncates_to_max_len() {
        let name = "a".repeat(150);
        assert_eq!(Handle::slugify(&name).unwrap().as_str().len(), MAX_HANDLE_LEN);
        let base = Handle::slugify(&"b ".repeat(80)).unwrap();
        assert!(base.as_str().len() <= MAX_HANDLE_LEN);
        assert!(!base.as_str().ends_with('-'));
        let suffixed = base.with_suffix(12);
        assert!(suffixed.as_str().len() <= MAX_HANDLE_LEN);
        assert!(suffixed.as_str().ends_with("-12"));
    }

    #[test]
    fn test_quantity_delta_floors_at_zero() {
        let q = Quantity::new(3);
        assert_eq!(q.apply_delta(-10).value(), 0);
        assert_eq!(q.apply_delta(4).value(), 7);
        assert_eq!(Quantity::new(-2).value(), 0);
    }
}
