// 📄 Reply Parser - Structured receipts out of messy LLM output
// Hosted models wrap JSON in markdown fences, quote numbers, rename keys,
// and drop fields. This layer normalizes all of that into a Receipt.

use crate::receipt::{round_cents, LineItem, Receipt};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde_json::Value;

/// Strip markdown code fences the model may have wrapped around the JSON
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();

    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let body = &trimmed[start + fence.len()..];
            if let Some(end) = body.find("```") {
                return body[..end].trim();
            }
        }
    }

    trimmed
}

/// Parse a model reply into a receipt
///
/// Tolerates the common reply quirks:
/// - `name`/`price` instead of `description`/`unit_price`
/// - amounts as strings with currency symbols ("$3.50", "1,200.00")
/// - missing item amounts (recomputed from quantity × price)
/// - missing total (inferred from items + tax)
pub fn parse_receipt_json(text: &str) -> Result<Receipt> {
    let payload = strip_code_fences(text);
    let value: Value = serde_json::from_str(payload).context("reply is not valid JSON")?;
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("reply JSON is not an object"))?;

    let mut receipt = Receipt::new();

    receipt.vendor = object
        .get("vendor")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);

    receipt.date = object
        .get("date")
        .and_then(Value::as_str)
        .and_then(parse_date);

    if let Some(currency) = object.get("currency").and_then(Value::as_str) {
        if !currency.trim().is_empty() {
            receipt.currency = currency.trim().to_string();
        }
    }

    if let Some(items) = object.get("items").or_else(|| object.get("line_items")) {
        for item in items.as_array().map(Vec::as_slice).unwrap_or_default() {
            if let Some(parsed) = parse_line_item(item) {
                receipt.line_items.push(parsed);
            }
        }
    }

    receipt.subtotal = object.get("subtotal").and_then(coerce_amount);
    receipt.tax = object.get("tax").and_then(coerce_amount);
    receipt.total = object.get("total").and_then(coerce_amount);

    // Models sometimes omit the total; infer it rather than hand the
    // validator a guaranteed MissingField
    if receipt.total.is_none() && !receipt.line_items.is_empty() {
        receipt.total = Some(receipt.computed_total());
    }

    Ok(receipt)
}

fn parse_line_item(value: &Value) -> Option<LineItem> {
    let object = value.as_object()?;

    let description = object
        .get("description")
        .or_else(|| object.get("name"))
        .and_then(Value::as_str)?
        .trim()
        .to_string();
    if description.is_empty() {
        return None;
    }

    let unit_price = object
        .get("unit_price")
        .or_else(|| object.get("price"))
        .and_then(coerce_amount)?;

    let quantity = object
        .get("quantity")
        .and_then(coerce_amount)
        .filter(|q| *q > 0.0)
        .unwrap_or(1.0);

    let amount = object
        .get("amount")
        .and_then(coerce_amount)
        .unwrap_or_else(|| round_cents(quantity * unit_price));

    let category = object
        .get("category")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from);

    Some(LineItem {
        description,
        quantity,
        unit_price,
        amount,
        category,
    })
}

/// Coerce a JSON value into a monetary amount
/// Accepts numbers and strings like "$1,234.56"
fn coerce_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

/// Parse dates in the formats extractors actually emit
fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    for format in ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    None
}

// ============================================================================
// TESTS
// ============================================================================
