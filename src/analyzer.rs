// 🕵️ Receipt Analyzer - Full pipeline orchestration
// Image → OCR → structured extraction → reconciliation loop → similarity
// lookup → vector store upsert. Each stage is a collaborator behind a
// trait; the analyzer only wires them together.

use crate::providers::{CorrectionProvider, ExtractionProvider, OcrProvider};
use crate::receipt::Receipt;
use crate::reconcile::{
    ReconcileConfig, ReconcileConfigError, ReconcileEngine, ReconcileOutcome,
};
use crate::vector::{embed_receipt, SimilarReceipt, VectorStore};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Number of similar receipts fetched per analysis
const SIMILAR_K: usize = 3;

/// Result of analyzing one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub outcome: ReconcileOutcome,
    pub similar: Vec<SimilarReceipt>,
}

pub struct ReceiptAnalyzer {
    ocr: Option<Arc<dyn OcrProvider>>,
    extractor: Option<Arc<dyn ExtractionProvider>>,
    engine: ReconcileEngine,
    vector_store: Arc<dyn VectorStore>,
}

impl ReceiptAnalyzer {
    pub fn new(
        config: ReconcileConfig,
        correction: Option<Arc<dyn CorrectionProvider>>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Result<Self, ReconcileConfigError> {
        Ok(ReceiptAnalyzer {
            ocr: None,
            extractor: None,
            engine: ReconcileEngine::new(config, correction)?,
            vector_store,
        })
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrProvider>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ExtractionProvider>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Analyze a receipt image end to end
    pub async fn analyze_image(&self, image: &[u8]) -> Result<Analysis> {
        let ocr = self
            .ocr
            .as_ref()
            .context("no OCR provider configured")?;
        let text = ocr.process_image(image).await?;
        self.analyze_text(&text).await
    }

    /// Analyze already-OCR'd receipt text
    pub async fn analyze_text(&self, ocr_text: &str) -> Result<Analysis> {
        let extractor = self
            .extractor
            .as_ref()
            .context("no extraction provider configured")?;
        let record = extractor.extract(ocr_text).await?;
        self.analyze_record(record).await
    }

    /// Reconcile an already-extracted record
    ///
    /// Human edits re-enter here as a fresh record. Similar receipts are
    /// looked up before the new one is stored, so a receipt never matches
    /// itself; only accepted records are upserted.
    pub async fn analyze_record(&self, record: Receipt) -> Result<Analysis> {
        let embedding = embed_receipt(&record);
        let outcome = self.engine.reconcile(record).await;

        // Similarity is advisory; a store failure degrades to an empty list
        // but is never silent
        let similar = match self.vector_store.query_similar(&embedding, SIMILAR_K).await {
            Ok(similar) => similar,
            Err(error) => {
                warn!(%error, "Similarity lookup failed");
                Vec::new()
            }
        };

        if outcome.is_accepted() {
            let accepted_embedding = embed_receipt(&outcome.record);
            self.vector_store
                .upsert(&outcome.record, &accepted_embedding)
                .await?;
            info!(receipt_id = %outcome.record.id, "Receipt stored for similarity search");
        }

        Ok(Analysis { outcome, similar })
    }
}

// ============================================================================
// TESTS
// ============================================================================
