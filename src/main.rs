use anyhow::{Context, Result};
use rusqlite::Connection;
use std::env;
use std::fs;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use receipt_analyzer::{
    embed_receipt, expense_summary, export_line_items_csv, get_all_receipts, insert_outcome,
    setup_database, vendor_history, Analysis, AppConfig, AttemptOutcome, CorrectionProvider,
    CorrectionTier, InMemoryVectorStore, InsertResult, MistralProvider, Receipt, ReceiptAnalyzer,
    VectorStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("analyze") => {
            let path = args
                .get(2)
                .context("usage: receipt-analyzer analyze <receipt.json>")?;
            run_analyze(path).await
        }
        Some("history") => {
            let vendor = args
                .get(2)
                .context("usage: receipt-analyzer history <vendor>")?;
            run_history(vendor)
        }
        Some("summary") => run_summary(),
        Some("export") => {
            let path = args
                .get(2)
                .context("usage: receipt-analyzer export <out.csv>")?;
            run_export(path)
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("🧾 Receipt Analyzer v{}", receipt_analyzer::VERSION);
    println!();
    println!("Usage:");
    println!("  receipt-analyzer analyze <receipt.json>   Validate, correct, and archive a receipt");
    println!("  receipt-analyzer history <vendor>         Spending history for one vendor");
    println!("  receipt-analyzer summary                  Expenses by category");
    println!("  receipt-analyzer export <out.csv>         Export all line items as CSV");
}

fn open_archive(config: &AppConfig) -> Result<Connection> {
    let conn = Connection::open(&config.db_path)
        .with_context(|| format!("Failed to open archive at {:?}", config.db_path))?;
    setup_database(&conn)?;
    Ok(conn)
}

async fn run_analyze(path: &str) -> Result<()> {
    let config = AppConfig::from_env()?;
    let conn = open_archive(&config)?;

    let json = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let receipt: Receipt =
        serde_json::from_str(&json).with_context(|| format!("{} is not a valid receipt", path))?;

    println!("🧾 Analyzing receipt from {}", path);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Seed the similarity store from the archive
    let vector_store = Arc::new(InMemoryVectorStore::new());
    for archived in get_all_receipts(&conn)? {
        let embedding = embed_receipt(&archived.receipt);
        vector_store.upsert(&archived.receipt, &embedding).await?;
    }

    let correction: Option<Arc<dyn CorrectionProvider>> =
        config.mistral_api_key.as_ref().map(|key| {
            Arc::new(MistralProvider::new(key.clone()).with_model(config.model.clone()))
                as Arc<dyn CorrectionProvider>
        });
    if correction.is_none() {
        println!("⚠️  MISTRAL_API_KEY not set - local arithmetic fixes only");
    }

    let analyzer = ReceiptAnalyzer::new(config.reconcile_config(), correction, vector_store)?;
    let analysis = analyzer.analyze_record(receipt).await?;

    print_analysis(&analysis);

    // Archive the outcome, duplicates reported rather than re-inserted
    match insert_outcome(&conn, &analysis.outcome)? {
        InsertResult::Inserted => println!("\n💾 Archived to {:?}", config.db_path),
        InsertResult::Duplicate => {
            println!("\n⚠️  Already archived (matching fingerprint), skipped")
        }
    }

    Ok(())
}

fn print_analysis(analysis: &Analysis) {
    let outcome = &analysis.outcome;
    let receipt = &outcome.record;

    println!("\n📋 Final record:");
    println!(
        "   Vendor: {}",
        receipt.vendor.as_deref().unwrap_or("(missing)")
    );
    if let Some(date) = receipt.date {
        println!("   Date:   {}", date);
    }
    for item in &receipt.line_items {
        println!(
            "   - {}: {} x {:.2} = {:.2}",
            item.description, item.quantity, item.unit_price, item.amount
        );
    }
    if let Some(subtotal) = receipt.subtotal {
        println!("   Subtotal: {:.2}", subtotal);
    }
    if let Some(tax) = receipt.tax {
        println!("   Tax:      {:.2}", tax);
    }
    println!(
        "   Total:    {:.2} {}",
        receipt.total.unwrap_or(0.0),
        receipt.currency
    );

    if outcome.attempts.is_empty() {
        println!("\n✅ Consistent as extracted, no corrections needed");
    } else {
        println!(
            "\n🔧 Correction trail ({} attempt(s)):",
            outcome.attempts.len()
        );
        for attempt in &outcome.attempts {
            let tier = match attempt.tier {
                CorrectionTier::LocalFix => "local fix",
                CorrectionTier::Escalation => "escalation",
            };
            let result = match attempt.outcome {
                AttemptOutcome::Applied => {
                    format!("applied, changed {}", attempt.changed_fields.join(", "))
                }
                AttemptOutcome::Rejected => "rejected (no improvement)".to_string(),
                AttemptOutcome::ProviderFailure => format!(
                    "provider failure: {}",
                    attempt.note.as_deref().unwrap_or("unknown")
                ),
            };
            println!("   {}. [{}] {}", attempt.attempt_number, tier, result);
        }
    }

    if outcome.is_accepted() {
        println!("\n🎉 {}", outcome.summary());
    } else {
        println!("\n❌ {}", outcome.summary());
        for violation in &outcome.validation.violations {
            println!("   ✗ {}", violation);
        }
    }

    if !analysis.similar.is_empty() {
        println!("\n🔍 Similar receipts:");
        for similar in &analysis.similar {
            println!(
                "   {} ({:.2} {}) - score {:.2}",
                similar.receipt.vendor.as_deref().unwrap_or("?"),
                similar.receipt.total.unwrap_or(0.0),
                similar.receipt.currency,
                similar.score
            );
        }
    }
}

fn run_history(vendor: &str) -> Result<()> {
    let config = AppConfig::from_env()?;
    let conn = open_archive(&config)?;

    let history = vendor_history(&conn, vendor)?;

    println!("🏪 History for {}", history.vendor);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("   Receipts:       {}", history.receipt_count);
    println!("   Total spent:    {:.2}", history.total_spent);
    if let Some(first) = history.first_purchase {
        println!("   First purchase: {}", first);
    }
    if let Some(last) = history.last_purchase {
        println!("   Last purchase:  {}", last);
    }

    Ok(())
}

fn run_summary() -> Result<()> {
    let config = AppConfig::from_env()?;
    let conn = open_archive(&config)?;

    let summary = expense_summary(&conn)?;

    println!("📊 Expenses by category");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if summary.is_empty() {
        println!("   (archive is empty)");
    }
    for row in summary {
        println!(
            "   {:<20} {:>4} item(s)  {:>10.2}",
            row.category, row.item_count, row.total
        );
    }

    Ok(())
}

fn run_export(path: &str) -> Result<()> {
    let config = AppConfig::from_env()?;
    let conn = open_archive(&config)?;

    let file = fs::File::create(path).with_context(|| format!("Failed to create {}", path))?;
    let rows = export_line_items_csv(&conn, file)?;

    println!("✓ Exported {} line item(s) to {}", rows, path);
    Ok(())
}
