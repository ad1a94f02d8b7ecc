// 🔌 External Collaborators - OCR, extraction, and correction providers
// The reconciliation core only ever talks to the outside world through
// these traits; everything behind them is a hosted service.

pub mod mistral;
pub mod mock;

use crate::receipt::Receipt;
use crate::validator::Violation;
use anyhow::Result;
use async_trait::async_trait;

/// Turns a receipt image into raw text.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn process_image(&self, image: &[u8]) -> Result<String>;
}

/// Turns raw OCR text into a structured receipt (pre-validation).
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, ocr_text: &str) -> Result<Receipt>;
}

/// Proposes a corrected receipt given the current candidate and its
/// violations. Only called from the escalation tier, never for local fixes.
#[async_trait]
pub trait CorrectionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn propose_correction(
        &self,
        receipt: &Receipt,
        violations: &[Violation],
    ) -> Result<Receipt>;
}
