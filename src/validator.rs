// ⚖️ Receipt Validator - Arithmetic and structural consistency checks
// Ensures line_items sum to subtotal and subtotal + tax = total
//
// Following the invariants:
//   amount  = round(quantity * unit_price, 2)
//   subtotal = sum(line_items[i].amount)
//   total    = subtotal + tax
//
// Pure function over the receipt value: no I/O, deterministic for a given
// receipt and tolerance.

use crate::receipt::{fields, Receipt};
use serde::{Deserialize, Serialize};

// ============================================================================
// VIOLATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Required field (vendor, total) is absent
    MissingField,

    /// Stated value disagrees with the recomputed value beyond tolerance
    ArithmeticMismatch,

    /// Shape or sign problem: empty items with nonzero stated totals,
    /// non-positive quantities, negative monetary amounts
    StructuralMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub kind: ViolationKind,
    pub expected: String,
    pub actual: String,
    /// Absolute difference for arithmetic mismatches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

impl Violation {
    pub fn missing(field: &str) -> Self {
        Violation {
            field: field.to_string(),
            kind: ViolationKind::MissingField,
            expected: "present".to_string(),
            actual: "missing".to_string(),
            delta: None,
        }
    }

    pub fn arithmetic(field: &str, expected: f64, actual: f64) -> Self {
        Violation {
            field: field.to_string(),
            kind: ViolationKind::ArithmeticMismatch,
            expected: format!("{:.2}", expected),
            actual: format!("{:.2}", actual),
            delta: Some((expected - actual).abs()),
        }
    }

    pub fn structural(field: &str, expected: &str, actual: &str) -> Self {
        Violation {
            field: field.to_string(),
            kind: ViolationKind::StructuralMismatch,
            expected: expected.to_string(),
            actual: actual.to_string(),
            delta: None,
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: expected {}, got {}",
            self.field, self.expected, self.actual
        )
    }
}

// ============================================================================
// VALIDATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn valid() -> Self {
        ValidationReport {
            is_valid: true,
            violations: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        if self.is_valid {
            "Valid: all calculations check out".to_string()
        } else {
            format!(
                "Invalid: {} violation(s) - {}",
                self.violations.len(),
                self.violations
                    .iter()
                    .map(|v| v.field.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        }
    }
}

// ============================================================================
// VALIDATOR
// ============================================================================

pub struct Validator {
    /// Tolerance for monetary comparisons (default: $0.01)
    pub tolerance: f64,
}

impl Validator {
    pub fn new() -> Self {
        Validator { tolerance: 0.01 }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        Validator { tolerance }
    }

    /// Validate a receipt's internal consistency
    ///
    /// Violations are reported in a fixed order: missing required fields,
    /// structural problems (shape and sign), per-item arithmetic, subtotal,
    /// total.
    pub fn validate(&self, receipt: &Receipt) -> ValidationReport {
        let mut violations = Vec::new();

        // Required fields
        if receipt.vendor.as_deref().map_or(true, |v| v.trim().is_empty()) {
            violations.push(Violation::missing(fields::VENDOR));
        }
        if receipt.total.is_none() {
            violations.push(Violation::missing(fields::TOTAL));
        }

        // Sign constraints: quantities positive, money never negative
        for (i, item) in receipt.line_items.iter().enumerate() {
            if item.quantity <= 0.0 {
                violations.push(Violation::structural(
                    &fields::line_item_part(i, "quantity"),
                    "positive quantity",
                    &format!("{}", item.quantity),
                ));
            }
            if item.unit_price < 0.0 {
                violations.push(Violation::structural(
                    &fields::line_item_part(i, "unit_price"),
                    "non-negative amount",
                    &format!("{:.2}", item.unit_price),
                ));
            }
            if item.amount < 0.0 {
                violations.push(Violation::structural(
                    &fields::line_item(i),
                    "non-negative amount",
                    &format!("{:.2}", item.amount),
                ));
            }
        }
        for (field, value) in [
            (fields::SUBTOTAL, receipt.subtotal),
            (fields::TAX, receipt.tax),
            (fields::TOTAL, receipt.total),
        ] {
            if let Some(value) = value {
                if value < 0.0 {
                    violations.push(Violation::structural(
                        field,
                        "non-negative amount",
                        &format!("{:.2}", value),
                    ));
                }
            }
        }

        // Empty item list is only consistent with zero-or-absent totals
        if receipt.line_items.is_empty() {
            let subtotal_nonzero = receipt.subtotal.map_or(false, |s| s.abs() >= self.tolerance);
            let total_nonzero = receipt.total.map_or(false, |t| t.abs() >= self.tolerance);
            if subtotal_nonzero || total_nonzero {
                violations.push(Violation::structural(
                    fields::LINE_ITEMS,
                    "items matching stated totals",
                    "no items with nonzero totals",
                ));
            }
        }

        // Per-item: amount must equal quantity × unit_price
        for (i, item) in receipt.line_items.iter().enumerate() {
            let expected = item.computed_amount();
            if (expected - item.amount).abs() > self.tolerance {
                violations.push(Violation::arithmetic(&fields::line_item(i), expected, item.amount));
            }
        }

        // Subtotal must equal the sum of item amounts
        if let Some(stated) = receipt.subtotal {
            let expected = receipt.computed_subtotal();
            if (expected - stated).abs() > self.tolerance {
                violations.push(Violation::arithmetic(fields::SUBTOTAL, expected, stated));
            }
        }

        // Total must equal item sum + tax
        if let Some(stated) = receipt.total {
            if !receipt.line_items.is_empty() {
                let expected = receipt.computed_total();
                if (expected - stated).abs() > self.tolerance {
                    violations.push(Violation::arithmetic(fields::TOTAL, expected, stated));
                }
            }
        }

        ValidationReport {
            is_valid: violations.is_empty(),
            violations,
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::LineItem;
    use chrono::NaiveDate;

    fn item(description: &str, quantity: f64, unit_price: f64, amount: f64) -> LineItem {
        LineItem {
            description: description.to_string(),
            quantity,
            unit_price,
            amount,
            category: None,
        }
    }

    fn consistent_receipt() -> Receipt {
        Receipt {
            vendor: Some("Whole Foods".to_string()),
            date: NaiveDate::from_ymd_opt(2025, 2, 1),
            line_items: vec![
                item("Bananas", 2.0, 0.60, 1.20),
                item("Oat milk", 1.0, 4.29, 4.29),
            ],
            subtotal: Some(5.49),
            tax: Some(0.44),
            total: Some(5.93),
            ..Receipt::new()
        }
    }

    #[test]
    fn test_consistent_receipt_is_valid() {
        let report = Validator::new().validate(&consistent_receipt());
        assert!(report.is_valid);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_validation_is_deterministic() {
        let receipt = consistent_receipt();
        let validator = Validator::new();
        assert_eq!(validator.validate(&receipt), validator.validate(&receipt));
    }

    #[test]
    fn test_wrong_total_reported_with_delta() {
        let mut receipt = consistent_receipt();
        receipt.total = Some(6.93);

        let report = Validator::new().validate(&receipt);
        assert!(!report.is_valid);
        assert_eq!(report.violations.len(), 1);

        let violation = &report.violations[0];
        assert_eq!(violation.field, fields::TOTAL);
        assert_eq!(violation.kind, ViolationKind::ArithmeticMismatch);
        assert_eq!(violation.expected, "5.93");
        assert_eq!(violation.actual, "6.93");
        assert!((violation.delta.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_line_item_amount_mismatch() {
        let mut receipt = consistent_receipt();
        receipt.line_items[0].amount = 1.80; // 2 x 0.60 should be 1.20
        receipt.subtotal = Some(6.09);
        receipt.total = Some(6.53);

        let report = Validator::new().validate(&receipt);
        assert!(!report.is_valid);
        assert_eq!(report.violations[0].field, fields::line_item(0));
        assert_eq!(report.violations[0].kind, ViolationKind::ArithmeticMismatch);
    }

    #[test]
    fn test_missing_vendor_and_total() {
        let mut receipt = consistent_receipt();
        receipt.vendor = None;
        receipt.total = None;

        let report = Validator::new().validate(&receipt);
        let missing: Vec<&str> = report
            .violations
            .iter()
            .filter(|v| v.kind == ViolationKind::MissingField)
            .map(|v| v.field.as_str())
            .collect();
        assert_eq!(missing, vec![fields::VENDOR, fields::TOTAL]);
    }

    #[test]
    fn test_blank_vendor_counts_as_missing() {
        let mut receipt = consistent_receipt();
        receipt.vendor = Some("   ".to_string());

        let report = Validator::new().validate(&receipt);
        assert!(report
            .violations
            .iter()
            .any(|v| v.field == fields::VENDOR && v.kind == ViolationKind::MissingField));
    }

    #[test]
    fn test_empty_items_with_nonzero_total_is_structural() {
        let receipt = Receipt {
            vendor: Some("Kiosk".to_string()),
            line_items: vec![],
            subtotal: Some(10.00),
            total: Some(10.00),
            ..Receipt::new()
        };

        let report = Validator::new().validate(&receipt);
        assert!(report
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::StructuralMismatch));
    }

    #[test]
    fn test_empty_items_with_zero_totals_passes_structure() {
        let receipt = Receipt {
            vendor: Some("Kiosk".to_string()),
            line_items: vec![],
            subtotal: Some(0.0),
            total: Some(0.0),
            ..Receipt::new()
        };

        let report = Validator::new().validate(&receipt);
        assert!(report.is_valid);
    }

    #[test]
    fn test_negative_amounts_are_rejected() {
        // Arithmetically self-consistent, but every value has the wrong sign
        let receipt = Receipt {
            vendor: Some("Refund Depot".to_string()),
            line_items: vec![item("Returned widget", -1.0, 3.50, -3.50)],
            subtotal: Some(-3.50),
            tax: Some(0.0),
            total: Some(-3.50),
            ..Receipt::new()
        };

        let report = Validator::new().validate(&receipt);
        assert!(!report.is_valid);

        let structural: Vec<&str> = report
            .violations
            .iter()
            .filter(|v| v.kind == ViolationKind::StructuralMismatch)
            .map(|v| v.field.as_str())
            .collect();
        assert_eq!(
            structural,
            vec![
                "line_items[0].quantity",
                "line_items[0].amount",
                fields::SUBTOTAL,
                fields::TOTAL,
            ]
        );
    }

    #[test]
    fn test_zero_quantity_is_rejected() {
        let mut receipt = consistent_receipt();
        receipt.line_items[0].quantity = 0.0;
        receipt.line_items[0].amount = 0.0;
        receipt.subtotal = Some(4.29);
        receipt.total = Some(4.73);

        let report = Validator::new().validate(&receipt);
        assert!(report
            .violations
            .iter()
            .any(|v| v.field == "line_items[0].quantity"
                && v.kind == ViolationKind::StructuralMismatch));
    }

    #[test]
    fn test_negative_unit_price_is_rejected() {
        let mut receipt = consistent_receipt();
        receipt.line_items[0].unit_price = -0.60;
        receipt.line_items[0].amount = -1.20;
        receipt.subtotal = Some(3.09);
        receipt.total = Some(3.53);

        let report = Validator::new().validate(&receipt);
        assert!(report
            .violations
            .iter()
            .any(|v| v.field == "line_items[0].unit_price"));
        assert!(report
            .violations
            .iter()
            .any(|v| v.field == fields::line_item(0)
                && v.kind == ViolationKind::StructuralMismatch));
    }

    #[test]
    fn test_tolerance_allows_sub_cent_drift() {
        let mut receipt = consistent_receipt();
        receipt.total = Some(5.935); // half a cent off

        let report = Validator::new().validate(&receipt);
        assert!(report.is_valid);

        let strict = Validator::with_tolerance(0.001).validate(&receipt);
        assert!(!strict.is_valid);
    }
}
