// Receipt Analyzer - Core Library
// Exposes all modules for use in the CLI, API server, and tests

pub mod analyzer;
pub mod config;
pub mod corrector;
pub mod parser;
pub mod providers;
pub mod receipt;
pub mod reconcile;
pub mod store;
pub mod validator;
pub mod vector;

// Re-export commonly used types
pub use analyzer::{Analysis, ReceiptAnalyzer};
pub use config::{AppConfig, ConfigError};
pub use corrector::{AttemptOutcome, CorrectionAttempt, CorrectionTier, Corrector};
pub use parser::{parse_receipt_json, strip_code_fences};
pub use providers::{
    mistral::MistralProvider,
    mock::{MockCorrector, MockExtractor, MockOcr},
    CorrectionProvider, ExtractionProvider, OcrProvider,
};
pub use receipt::{LineItem, Receipt};
pub use reconcile::{
    LoopState, ReconcileConfig, ReconcileConfigError, ReconcileEngine, ReconcileOutcome,
    ReconcileStatus,
};
pub use store::{
    expense_summary, export_line_items_csv, get_all_receipts, get_audit_trail,
    get_receipts_by_vendor, insert_outcome, setup_database, vendor_history, verify_count,
    ArchivedReceipt, CategoryTotal, InsertResult, VendorHistory,
};
pub use validator::{ValidationReport, Validator, Violation, ViolationKind};
pub use vector::{embed_receipt, embed_text, InMemoryVectorStore, SimilarReceipt, VectorStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
