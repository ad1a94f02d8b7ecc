// 🗄️ Receipt Archive - SQLite persistence for reconciled receipts
// Stores the final record plus its full audit trail, deduplicated by
// content fingerprint. Backs vendor history, expense summaries, and
// CSV export.

use crate::corrector::CorrectionAttempt;
use crate::receipt::{LineItem, Receipt};
use crate::reconcile::{ReconcileOutcome, ReconcileStatus};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS receipts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT UNIQUE NOT NULL,
            receipt_id TEXT UNIQUE NOT NULL,
            vendor TEXT,
            date TEXT,
            currency TEXT NOT NULL,
            subtotal REAL,
            tax REAL,
            total REAL,
            line_items TEXT NOT NULL,
            confidence TEXT NOT NULL,
            ocr_text TEXT,
            status TEXT NOT NULL,
            attempts_used INTEGER NOT NULL,
            audit_trail TEXT NOT NULL,
            archived_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_receipts_fingerprint ON receipts(fingerprint)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_receipts_vendor ON receipts(vendor)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_receipts_date ON receipts(date)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// TYPES
// ============================================================================

/// A reconciled receipt as stored in the archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedReceipt {
    pub receipt: Receipt,
    pub status: ReconcileStatus,
    pub attempts_used: usize,
}

/// Result of an insert: duplicates are reported, never silently dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    Duplicate,
}

/// Aggregated history for one vendor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorHistory {
    pub vendor: String,
    pub receipt_count: usize,
    pub total_spent: f64,
    pub first_purchase: Option<NaiveDate>,
    pub last_purchase: Option<NaiveDate>,
}

/// One row of the expense summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTotal {
    pub category: String,
    pub item_count: usize,
    pub total: f64,
}

fn status_code(status: ReconcileStatus) -> &'static str {
    match status {
        ReconcileStatus::Accepted => "accepted",
        ReconcileStatus::Exhausted => "exhausted",
    }
}

fn status_from_code(code: &str) -> ReconcileStatus {
    match code {
        "exhausted" => ReconcileStatus::Exhausted,
        _ => ReconcileStatus::Accepted,
    }
}

// ============================================================================
// WRITES
// ============================================================================

/// Archive a reconciliation outcome (final record + audit trail)
///
/// Receipts with an already-archived fingerprint are reported as duplicates
/// and left untouched.
pub fn insert_outcome(conn: &Connection, outcome: &ReconcileOutcome) -> Result<InsertResult> {
    let receipt = &outcome.record;
    let fingerprint = receipt.fingerprint();

    let line_items_json =
        serde_json::to_string(&receipt.line_items).context("Failed to serialize line items")?;
    let confidence_json =
        serde_json::to_string(&receipt.confidence).context("Failed to serialize confidence")?;
    let trail_json =
        serde_json::to_string(&outcome.attempts).context("Failed to serialize audit trail")?;

    let result = conn.execute(
        "INSERT INTO receipts (
            fingerprint, receipt_id, vendor, date, currency,
            subtotal, tax, total, line_items, confidence, ocr_text,
            status, attempts_used, audit_trail
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            fingerprint,
            receipt.id,
            receipt.vendor,
            receipt.date.map(|d| d.to_string()),
            receipt.currency,
            receipt.subtotal,
            receipt.tax,
            receipt.total,
            line_items_json,
            confidence_json,
            receipt.ocr_text,
            status_code(outcome.status),
            outcome.attempts.len() as i64,
            trail_json,
        ],
    );

    match result {
        Ok(_) => Ok(InsertResult::Inserted),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(InsertResult::Duplicate)
        }
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// READS
// ============================================================================

const SELECT_COLUMNS: &str = "receipt_id, vendor, date, currency, subtotal, tax, total, \
                              line_items, confidence, ocr_text, status, attempts_used";

fn json_column_error(column: usize, error: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(error))
}

fn row_to_archived(row: &rusqlite::Row) -> rusqlite::Result<ArchivedReceipt> {
    let line_items_json: String = row.get(7)?;
    let confidence_json: String = row.get(8)?;
    let date_text: Option<String> = row.get(2)?;
    let status_text: String = row.get(10)?;

    // Corrupt embedded JSON is a storage error, not an empty value
    let line_items: Vec<LineItem> = serde_json::from_str(&line_items_json)
        .map_err(|e| json_column_error(7, e))?;
    let confidence: HashMap<String, f64> =
        serde_json::from_str(&confidence_json).map_err(|e| json_column_error(8, e))?;

    let receipt = Receipt {
        id: row.get(0)?,
        vendor: row.get(1)?,
        date: date_text.and_then(|d| d.parse().ok()),
        line_items,
        subtotal: row.get(4)?,
        tax: row.get(5)?,
        total: row.get(6)?,
        currency: row.get(3)?,
        ocr_text: row.get(9)?,
        confidence,
    };

    Ok(ArchivedReceipt {
        receipt,
        status: status_from_code(&status_text),
        attempts_used: row.get::<_, i64>(11)? as usize,
    })
}

pub fn get_all_receipts(conn: &Connection) -> Result<Vec<ArchivedReceipt>> {
    let sql = format!(
        "SELECT {} FROM receipts ORDER BY date DESC, id DESC",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_archived)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

pub fn get_receipts_by_vendor(conn: &Connection, vendor: &str) -> Result<Vec<ArchivedReceipt>> {
    let sql = format!(
        "SELECT {} FROM receipts WHERE vendor = ?1 COLLATE NOCASE ORDER BY date DESC, id DESC",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![vendor], row_to_archived)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Audit trail for one archived receipt, by stable receipt identity
pub fn get_audit_trail(conn: &Connection, receipt_id: &str) -> Result<Vec<CorrectionAttempt>> {
    let trail_json: Option<String> = conn
        .query_row(
            "SELECT audit_trail FROM receipts WHERE receipt_id = ?1",
            params![receipt_id],
            |row| row.get(0),
        )
        .optional()?;

    match trail_json {
        Some(json) => serde_json::from_str(&json).context("Failed to parse audit trail"),
        None => Ok(Vec::new()),
    }
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM receipts", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// AGGREGATES
// ============================================================================

/// Spending history for a vendor: count, total, first/last purchase dates
pub fn vendor_history(conn: &Connection, vendor: &str) -> Result<VendorHistory> {
    let receipts = get_receipts_by_vendor(conn, vendor)?;

    let total_spent = receipts
        .iter()
        .filter_map(|a| a.receipt.total)
        .sum::<f64>();
    let mut dates: Vec<NaiveDate> = receipts.iter().filter_map(|a| a.receipt.date).collect();
    dates.sort();

    Ok(VendorHistory {
        vendor: vendor.to_string(),
        receipt_count: receipts.len(),
        total_spent,
        first_purchase: dates.first().copied(),
        last_purchase: dates.last().copied(),
    })
}

/// Spending by line-item category across the whole archive
/// Items without a category land in "Uncategorized"
pub fn expense_summary(conn: &Connection) -> Result<Vec<CategoryTotal>> {
    let receipts = get_all_receipts(conn)?;

    let mut totals: HashMap<String, (usize, f64)> = HashMap::new();
    for archived in &receipts {
        for item in &archived.receipt.line_items {
            let category = item
                .category
                .clone()
                .unwrap_or_else(|| "Uncategorized".to_string());
            let entry = totals.entry(category).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += item.amount;
        }
    }

    let mut summary: Vec<CategoryTotal> = totals
        .into_iter()
        .map(|(category, (item_count, total))| CategoryTotal {
            category,
            item_count,
            total,
        })
        .collect();
    summary.sort_by(|a, b| b.total.partial_cmp(&a.total).unwrap_or(std::cmp::Ordering::Equal));

    Ok(summary)
}

// ============================================================================
// EXPORT
// ============================================================================

#[derive(Serialize)]
struct ExportRow<'a> {
    vendor: &'a str,
    date: String,
    description: &'a str,
    category: &'a str,
    quantity: f64,
    unit_price: f64,
    amount: f64,
    currency: &'a str,
}

/// Export every archived line item as CSV; returns rows written
pub fn export_line_items_csv<W: Write>(conn: &Connection, writer: W) -> Result<usize> {
    let receipts = get_all_receipts(conn)?;
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut rows = 0;

    for archived in &receipts {
        let receipt = &archived.receipt;
        for item in &receipt.line_items {
            csv_writer.serialize(ExportRow {
                vendor: receipt.vendor.as_deref().unwrap_or(""),
                date: receipt.date.map(|d| d.to_string()).unwrap_or_default(),
                description: &item.description,
                category: item.category.as_deref().unwrap_or(""),
                quantity: item.quantity,
                unit_price: item.unit_price,
                amount: item.amount,
                currency: &receipt.currency,
            })?;
            rows += 1;
        }
    }

    csv_writer.flush()?;
    Ok(rows)
}

// ============================================================================
// TESTS
// ============================================================================
