// Receipt Analyzer - Web Server
// REST API over the reconciliation pipeline and the receipt archive

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use receipt_analyzer::{
    embed_receipt, expense_summary, get_all_receipts, insert_outcome, setup_database,
    vendor_history, Analysis, AppConfig, ArchivedReceipt, CategoryTotal, CorrectionProvider,
    InMemoryVectorStore, InsertResult, MistralProvider, Receipt, ReceiptAnalyzer, ReconcileStatus,
    VectorStore,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    analyzer: Arc<ReceiptAnalyzer>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

fn error_response(status: StatusCode, message: String) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: message,
        }),
    )
        .into_response()
}

/// Analyze response: the full analysis plus whether it was newly archived
#[derive(Serialize)]
struct AnalyzeResponse {
    analysis: Analysis,
    archived: bool,
}

/// Stats response
#[derive(Serialize)]
struct StatsResponse {
    total_receipts: usize,
    accepted: usize,
    exhausted: usize,
    total_spent: f64,
    by_category: Vec<CategoryTotal>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/receipts/analyze - Run the reconciliation loop on a record
/// Human edits from the UI re-enter here as fresh records.
async fn analyze_receipt(
    State(state): State<AppState>,
    Json(receipt): Json<Receipt>,
) -> impl IntoResponse {
    let analysis = match state.analyzer.analyze_record(receipt).await {
        Ok(analysis) => analysis,
        Err(e) => {
            tracing::error!(error = %e, "Analysis failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let archived = {
        let conn = state.db.lock().unwrap();
        match insert_outcome(&conn, &analysis.outcome) {
            Ok(InsertResult::Inserted) => true,
            Ok(InsertResult::Duplicate) => false,
            Err(e) => {
                tracing::error!(error = %e, "Failed to archive receipt");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
        }
    };

    (
        StatusCode::OK,
        Json(ApiResponse::ok(AnalyzeResponse { analysis, archived })),
    )
        .into_response()
}

/// GET /api/receipts - All archived receipts
async fn list_receipts(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match get_all_receipts(&conn) {
        Ok(receipts) => (StatusCode::OK, Json(ApiResponse::ok(receipts))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list receipts");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /api/vendors/:vendor - Spending history for one vendor
async fn get_vendor_history(
    State(state): State<AppState>,
    Path(vendor): Path<String>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match vendor_history(&conn, &vendor) {
        Ok(history) => (StatusCode::OK, Json(ApiResponse::ok(history))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, vendor, "Failed to load vendor history");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /api/stats - Archive statistics
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    let receipts = match get_all_receipts(&conn) {
        Ok(receipts) => receipts,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load receipts for stats");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };
    let by_category = expense_summary(&conn).unwrap_or_default();

    let accepted = receipts
        .iter()
        .filter(|r| r.status == ReconcileStatus::Accepted)
        .count();
    let total_spent = receipts
        .iter()
        .filter_map(|r: &ArchivedReceipt| r.receipt.total)
        .sum();

    let stats = StatsResponse {
        total_receipts: receipts.len(),
        accepted,
        exhausted: receipts.len() - accepted,
        total_spent,
        by_category,
    };

    (StatusCode::OK, Json(ApiResponse::ok(stats))).into_response()
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("🌐 Receipt Analyzer - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = AppConfig::from_env().expect("Invalid configuration");

    let conn = Connection::open(&config.db_path).expect("Failed to open archive");
    setup_database(&conn).expect("Failed to initialize archive schema");
    println!("✓ Archive opened: {:?}", config.db_path);

    // Seed the similarity store from the archive
    let vector_store = Arc::new(InMemoryVectorStore::new());
    let archived = get_all_receipts(&conn).expect("Failed to load archive");
    for entry in &archived {
        let embedding = embed_receipt(&entry.receipt);
        vector_store
            .upsert(&entry.receipt, &embedding)
            .await
            .expect("Failed to seed similarity store");
    }
    println!(
        "✓ Similarity store seeded with {} receipt(s)",
        archived.len()
    );

    let correction: Option<Arc<dyn CorrectionProvider>> =
        config.mistral_api_key.as_ref().map(|key| {
            Arc::new(MistralProvider::new(key.clone()).with_model(config.model.clone()))
                as Arc<dyn CorrectionProvider>
        });
    if correction.is_none() {
        println!("⚠️  MISTRAL_API_KEY not set - local arithmetic fixes only");
    }

    let analyzer = ReceiptAnalyzer::new(config.reconcile_config(), correction, vector_store)
        .expect("Invalid reconciliation configuration");

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        analyzer: Arc::new(analyzer),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/receipts", get(list_receipts))
        .route("/receipts/analyze", post(analyze_receipt))
        .route("/vendors/:vendor", get(get_vendor_history))
        .route("/stats", get(get_stats))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://localhost:3000");
    println!("   API: http://localhost:3000/api/receipts");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
