// 🧾 Receipt Model - Immutable extracted receipt values
// Core fields come straight from the OCR/LLM extractor; corrections never
// mutate a receipt in place, they produce a new value with the same identity.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// LINE ITEM
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Item name or description
    pub description: String,

    /// Quantity purchased (positive)
    #[serde(default = "default_quantity")]
    pub quantity: f64,

    /// Price per unit (non-negative)
    pub unit_price: f64,

    /// Extended amount as printed on the receipt (non-negative)
    pub amount: f64,

    /// Expense category, when the extractor assigned one
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

fn default_quantity() -> f64 {
    1.0
}

impl LineItem {
    /// Amount this line should carry: quantity × unit price, rounded to cents
    pub fn computed_amount(&self) -> f64 {
        round_cents(self.quantity * self.unit_price)
    }
}

/// Round a monetary value to 2 decimal places
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// RECEIPT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Stable identity - survives corrections (corrected copies keep the id)
    #[serde(default = "default_id")]
    pub id: String,

    /// Vendor or store name
    #[serde(default)]
    pub vendor: Option<String>,

    /// Receipt date
    #[serde(default)]
    pub date: Option<NaiveDate>,

    /// Purchased items, in printed order
    #[serde(default)]
    pub line_items: Vec<LineItem>,

    /// Stated subtotal before tax
    #[serde(default)]
    pub subtotal: Option<f64>,

    /// Stated tax amount
    #[serde(default)]
    pub tax: Option<f64>,

    /// Stated grand total
    #[serde(default)]
    pub total: Option<f64>,

    /// Currency code
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Raw OCR text the extractor worked from
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,

    /// Per-field confidence scores from the extractor, each in [0, 1]
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub confidence: HashMap<String, f64>,
}

fn default_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Receipt {
    /// Create an empty receipt with a fresh identity
    pub fn new() -> Self {
        Receipt {
            id: default_id(),
            vendor: None,
            date: None,
            line_items: Vec::new(),
            subtotal: None,
            tax: None,
            total: None,
            currency: default_currency(),
            ocr_text: None,
            confidence: HashMap::new(),
        }
    }

    /// Subtotal recomputed from line items
    pub fn computed_subtotal(&self) -> f64 {
        round_cents(self.line_items.iter().map(|item| item.amount).sum())
    }

    /// Total recomputed from line items plus stated tax (if any)
    pub fn computed_total(&self) -> f64 {
        round_cents(self.computed_subtotal() + self.tax.unwrap_or(0.0))
    }

    /// Copy with one monetary field replaced - the identity is preserved
    pub fn with_field(&self, field: &str, value: f64) -> Receipt {
        let mut next = self.clone();
        match field {
            fields::SUBTOTAL => next.subtotal = Some(value),
            fields::TAX => next.tax = Some(value),
            fields::TOTAL => next.total = Some(value),
            _ => {}
        }
        next
    }

    /// Content fingerprint for duplicate detection (vendor + date + totals + items)
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.vendor.as_deref().unwrap_or(""));
        hasher.update("|");
        if let Some(date) = self.date {
            hasher.update(date.to_string());
        }
        hasher.update("|");
        hasher.update(format!("{:.2}", self.total.unwrap_or(0.0)));
        for item in &self.line_items {
            hasher.update("|");
            hasher.update(&item.description);
            hasher.update(format!("{:.2}x{:.2}", item.quantity, item.unit_price));
        }
        format!("{:x}", hasher.finalize())
    }

    /// Searchable text rendering, used for embeddings and similarity queries
    pub fn to_search_text(&self) -> String {
        let mut lines = vec![
            format!("Vendor: {}", self.vendor.as_deref().unwrap_or("Unknown")),
            format!(
                "Date: {}",
                self.date.map_or_else(|| "unknown".to_string(), |d| d.to_string())
            ),
            format!("Total: {:.2} {}", self.total.unwrap_or(0.0), self.currency),
            "Items:".to_string(),
        ];

        for item in &self.line_items {
            let mut line = format!(
                "- {}: {} x {:.2} = {:.2}",
                item.description, item.quantity, item.unit_price, item.amount
            );
            if let Some(category) = &item.category {
                line.push_str(&format!(" (Category: {})", category));
            }
            lines.push(line);
        }

        if let Some(subtotal) = self.subtotal {
            lines.push(format!("Subtotal: {:.2}", subtotal));
        }
        if let Some(tax) = self.tax {
            lines.push(format!("Tax: {:.2}", tax));
        }

        lines.join("\n")
    }

    /// Fields that differ between this receipt and another, by canonical name
    pub fn diff_fields(&self, other: &Receipt) -> Vec<String> {
        let mut changed = Vec::new();

        if self.vendor != other.vendor {
            changed.push(fields::VENDOR.to_string());
        }
        if self.date != other.date {
            changed.push(fields::DATE.to_string());
        }
        if !opt_amount_eq(self.subtotal, other.subtotal) {
            changed.push(fields::SUBTOTAL.to_string());
        }
        if !opt_amount_eq(self.tax, other.tax) {
            changed.push(fields::TAX.to_string());
        }
        if !opt_amount_eq(self.total, other.total) {
            changed.push(fields::TOTAL.to_string());
        }
        if self.line_items.len() != other.line_items.len() {
            changed.push(fields::LINE_ITEMS.to_string());
        } else {
            for (i, (a, b)) in self.line_items.iter().zip(&other.line_items).enumerate() {
                if a != b {
                    changed.push(fields::line_item(i));
                }
            }
        }

        changed
    }
}

impl Default for Receipt {
    fn default() -> Self {
        Self::new()
    }
}

fn opt_amount_eq(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => false,
    }
}

// ============================================================================
// FIELD NAMES
// ============================================================================

/// Canonical field names used in violations, confidence maps, and audit trails
pub mod fields {
    pub const VENDOR: &str = "vendor";
    pub const DATE: &str = "date";
    pub const SUBTOTAL: &str = "subtotal";
    pub const TAX: &str = "tax";
    pub const TOTAL: &str = "total";
    pub const LINE_ITEMS: &str = "line_items";

    pub fn line_item(index: usize) -> String {
        line_item_part(index, "amount")
    }

    pub fn line_item_part(index: usize, part: &str) -> String {
        format!("line_items[{}].{}", index, part)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn coffee_receipt() -> Receipt {
        Receipt {
            vendor: Some("Blue Bottle".to_string()),
            date: NaiveDate::from_ymd_opt(2025, 3, 14),
            line_items: vec![LineItem {
                description: "Coffee".to_string(),
                quantity: 1.0,
                unit_price: 3.50,
                amount: 3.50,
                category: Some("Restaurants".to_string()),
            }],
            subtotal: Some(3.50),
            tax: Some(0.25),
            total: Some(3.75),
            ..Receipt::new()
        }
    }

    #[test]
    fn test_computed_subtotal_and_total() {
        let receipt = coffee_receipt();
        assert_eq!(receipt.computed_subtotal(), 3.50);
        assert_eq!(receipt.computed_total(), 3.75);
    }

    #[test]
    fn test_line_item_computed_amount_rounds_to_cents() {
        let item = LineItem {
            description: "Bulk almonds".to_string(),
            quantity: 0.335,
            unit_price: 9.99,
            amount: 3.35,
            category: None,
        };
        assert_eq!(item.computed_amount(), 3.35);
    }

    #[test]
    fn test_with_field_preserves_identity() {
        let receipt = coffee_receipt();
        let corrected = receipt.with_field(fields::TOTAL, 4.00);

        assert_eq!(corrected.id, receipt.id);
        assert_eq!(corrected.total, Some(4.00));
        assert_eq!(receipt.total, Some(3.75)); // original untouched
    }

    #[test]
    fn test_fingerprint_stable_and_content_sensitive() {
        let receipt = coffee_receipt();
        let mut same_content = coffee_receipt();
        same_content.id = "different-identity".to_string();

        assert_eq!(receipt.fingerprint(), same_content.fingerprint());

        let changed = receipt.with_field(fields::TOTAL, 9.99);
        assert_ne!(receipt.fingerprint(), changed.fingerprint());
    }

    #[test]
    fn test_diff_fields_reports_changed_names() {
        let receipt = coffee_receipt();
        let mut corrected = receipt.with_field(fields::TOTAL, 4.00);
        corrected.line_items[0].amount = 3.75;

        let changed = receipt.diff_fields(&corrected);
        assert!(changed.contains(&fields::TOTAL.to_string()));
        assert!(changed.contains(&fields::line_item(0)));
        assert!(!changed.contains(&fields::SUBTOTAL.to_string()));
    }

    #[test]
    fn test_search_text_includes_vendor_and_items() {
        let text = coffee_receipt().to_search_text();
        assert!(text.contains("Vendor: Blue Bottle"));
        assert!(text.contains("- Coffee: 1 x 3.50 = 3.50"));
        assert!(text.contains("Tax: 0.25"));
    }

    #[test]
    fn test_json_round_trip_with_defaults() {
        let json = r#"{"vendor":"Corner Store","total":12.00}"#;
        let receipt: Receipt = serde_json::from_str(json).unwrap();

        assert_eq!(receipt.vendor.as_deref(), Some("Corner Store"));
        assert_eq!(receipt.currency, "USD");
        assert!(receipt.line_items.is_empty());
        assert!(!receipt.id.is_empty());
    }
}
