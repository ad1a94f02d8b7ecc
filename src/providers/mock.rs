// 🎭 Mock Providers - Scripted responses for tests and offline runs

use crate::providers::{CorrectionProvider, ExtractionProvider, OcrProvider};
use crate::receipt::Receipt;
use crate::validator::Violation;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted reply for a mock provider call.
enum Reply {
    Receipt(Receipt),
    Error(String),
}

/// Mock correction provider. Replies are consumed in FIFO order; once the
/// script runs dry every further call errors. An optional delay simulates a
/// slow upstream for timeout tests.
pub struct MockCorrector {
    replies: Mutex<VecDeque<Reply>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockCorrector {
    pub fn new() -> Self {
        MockCorrector {
            replies: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a receipt to return on the next call
    pub fn push_reply(&self, receipt: Receipt) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Receipt(receipt));
    }

    /// Queue an error to return on the next call
    pub fn push_error(&self, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Error(message.to_string()));
    }

    /// How many times propose_correction was invoked
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockCorrector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CorrectionProvider for MockCorrector {
    fn name(&self) -> &str {
        "mock-corrector"
    }

    async fn propose_correction(
        &self,
        _receipt: &Receipt,
        _violations: &[Violation],
    ) -> Result<Receipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Receipt(receipt)) => Ok(receipt),
            Some(Reply::Error(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("mock corrector script exhausted")),
        }
    }
}

/// Mock extractor that always returns the same receipt.
pub struct MockExtractor {
    receipt: Receipt,
}

impl MockExtractor {
    pub fn new(receipt: Receipt) -> Self {
        MockExtractor { receipt }
    }
}

#[async_trait]
impl ExtractionProvider for MockExtractor {
    fn name(&self) -> &str {
        "mock-extractor"
    }

    async fn extract(&self, _ocr_text: &str) -> Result<Receipt> {
        Ok(self.receipt.clone())
    }
}

/// Mock OCR that echoes a fixed text for any image.
pub struct MockOcr {
    text: String,
}

impl MockOcr {
    pub fn new(text: impl Into<String>) -> Self {
        MockOcr { text: text.into() }
    }
}

#[async_trait]
impl OcrProvider for MockOcr {
    fn name(&self) -> &str {
        "mock-ocr"
    }

    async fn process_image(&self, _image: &[u8]) -> Result<String> {
        Ok(self.text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_consumed_in_order_then_error() {
        let corrector = MockCorrector::new();
        corrector.push_reply(Receipt::new());
        corrector.push_error("upstream 500");

        let record = Receipt::new();
        assert!(corrector.propose_correction(&record, &[]).await.is_ok());
        assert!(corrector.propose_correction(&record, &[]).await.is_err());
        assert!(corrector.propose_correction(&record, &[]).await.is_err()); // script dry
        assert_eq!(corrector.call_count(), 3);
    }
}
