// 🔁 Reconciliation Loop - Drive a receipt to arithmetic consistency
// Bounded fixed-point iteration: validate, correct, repeat, until the
// receipt is consistent or the attempt budget runs out. Every attempt is
// recorded; the audit trail length always equals attempts used.

use crate::corrector::{CorrectionAttempt, Corrector};
use crate::providers::CorrectionProvider;
use crate::receipt::Receipt;
use crate::validator::{ValidationReport, Validator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Tolerance for monetary comparisons (default: $0.01)
    pub tolerance: f64,

    /// Maximum correction attempts before giving up (default: 3)
    pub max_attempts: usize,

    /// Timeout for a single escalation call (default: 30s)
    pub provider_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            tolerance: 0.01,
            max_attempts: 3,
            provider_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileConfigError {
    #[error("max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(usize),

    #[error("tolerance must be positive, got {0}")]
    InvalidTolerance(f64),
}

// ============================================================================
// LOOP STATE & OUTCOME
// ============================================================================

/// Loop states. Accepted and Exhausted are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Initial,
    Validating,
    Correcting,
    Accepted,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileStatus {
    /// Receipt reached arithmetic consistency
    Accepted,

    /// Attempt budget spent with the receipt still inconsistent
    Exhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub status: ReconcileStatus,

    /// Final candidate - the accepted record, or the last candidate on
    /// exhaustion (still invalid, never silently promoted to valid)
    pub record: Receipt,

    /// Validation of the final candidate
    pub validation: ValidationReport,

    /// Full ordered audit trail; length always equals attempts used
    pub attempts: Vec<CorrectionAttempt>,

    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl ReconcileOutcome {
    pub fn is_accepted(&self) -> bool {
        self.status == ReconcileStatus::Accepted
    }

    pub fn attempts_used(&self) -> usize {
        self.attempts.len()
    }

    pub fn summary(&self) -> String {
        match self.status {
            ReconcileStatus::Accepted => format!(
                "Accepted after {} correction attempt(s)",
                self.attempts.len()
            ),
            ReconcileStatus::Exhausted => format!(
                "Exhausted after {} attempt(s): {} violation(s) remain",
                self.attempts.len(),
                self.validation.violations.len()
            ),
        }
    }
}

// ============================================================================
// RECONCILE ENGINE
// ============================================================================

pub struct ReconcileEngine {
    validator: Validator,
    corrector: Corrector,
    max_attempts: usize,
}

impl ReconcileEngine {
    /// Build an engine, failing fast on malformed configuration
    pub fn new(
        config: ReconcileConfig,
        provider: Option<Arc<dyn CorrectionProvider>>,
    ) -> Result<Self, ReconcileConfigError> {
        if config.max_attempts < 1 {
            return Err(ReconcileConfigError::InvalidMaxAttempts(config.max_attempts));
        }
        if config.tolerance <= 0.0 {
            return Err(ReconcileConfigError::InvalidTolerance(config.tolerance));
        }

        Ok(ReconcileEngine {
            validator: Validator::with_tolerance(config.tolerance),
            corrector: Corrector::new(config.tolerance, provider, config.provider_timeout),
            max_attempts: config.max_attempts,
        })
    }

    /// Run the loop on one receipt
    ///
    /// INITIAL → VALIDATING on receipt of the record.
    /// VALIDATING → ACCEPTED when the report is valid.
    /// VALIDATING → CORRECTING while attempts remain, → EXHAUSTED otherwise.
    /// CORRECTING → VALIDATING with the next candidate, incrementing the
    /// attempt count. Failed or rejected attempts keep the current candidate.
    pub async fn reconcile(&self, receipt: Receipt) -> ReconcileOutcome {
        let mut state = LoopState::Initial;
        let mut candidate = receipt;
        let mut attempts: Vec<CorrectionAttempt> = Vec::new();
        let mut report: Option<ValidationReport> = None;

        loop {
            match state {
                LoopState::Initial => {
                    debug!(receipt_id = %candidate.id, "Reconciliation started");
                    state = LoopState::Validating;
                }

                LoopState::Validating => {
                    let current = self.validator.validate(&candidate);
                    state = if current.is_valid {
                        LoopState::Accepted
                    } else if attempts.len() < self.max_attempts {
                        LoopState::Correcting
                    } else {
                        LoopState::Exhausted
                    };
                    report = Some(current);
                }

                LoopState::Correcting => {
                    let violations = report
                        .as_ref()
                        .map(|r| r.violations.as_slice())
                        .unwrap_or_default();
                    let attempt = self
                        .corrector
                        .correct(attempts.len() + 1, &candidate, violations)
                        .await;

                    if let Some(next) = attempt.next_candidate() {
                        candidate = next.clone();
                    }
                    attempts.push(attempt);
                    state = LoopState::Validating;
                }

                LoopState::Accepted => {
                    info!(
                        receipt_id = %candidate.id,
                        attempts = attempts.len(),
                        "Receipt accepted"
                    );
                    return ReconcileOutcome {
                        status: ReconcileStatus::Accepted,
                        record: candidate,
                        validation: report.unwrap_or_else(ValidationReport::valid),
                        attempts,
                        completed_at: chrono::Utc::now(),
                    };
                }

                LoopState::Exhausted => {
                    let validation = report.unwrap_or_else(ValidationReport::valid);
                    info!(
                        receipt_id = %candidate.id,
                        attempts = attempts.len(),
                        remaining = validation.violations.len(),
                        "Attempt budget exhausted"
                    );
                    return ReconcileOutcome {
                        status: ReconcileStatus::Exhausted,
                        record: candidate,
                        validation,
                        attempts,
                        completed_at: chrono::Utc::now(),
                    };
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrector::{AttemptOutcome, CorrectionTier};
    use crate::providers::mock::MockCorrector;
    use crate::receipt::LineItem;

    fn engine(provider: Option<Arc<dyn CorrectionProvider>>) -> ReconcileEngine {
        let config = ReconcileConfig {
            provider_timeout: Duration::from_millis(200),
            ..ReconcileConfig::default()
        };
        ReconcileEngine::new(config, provider).unwrap()
    }

    fn coffee_receipt(total: f64) -> Receipt {
        Receipt {
            vendor: Some("Cafe".to_string()),
            line_items: vec![LineItem {
                description: "Coffee".to_string(),
                quantity: 1.0,
                unit_price: 3.50,
                amount: 3.50,
                category: None,
            }],
            subtotal: Some(3.50),
            tax: Some(0.25),
            total: Some(total),
            ..Receipt::new()
        }
    }

    #[tokio::test]
    async fn test_consistent_receipt_accepted_without_attempts() {
        let outcome = engine(None).reconcile(coffee_receipt(3.75)).await;

        assert!(outcome.is_accepted());
        assert_eq!(outcome.attempts_used(), 0);
        assert!(outcome.validation.is_valid);
    }

    #[tokio::test]
    async fn test_wrong_total_fixed_in_one_local_attempt_no_provider_call() {
        let mock = Arc::new(MockCorrector::new());
        let outcome = engine(Some(mock.clone())).reconcile(coffee_receipt(3.00)).await;

        assert!(outcome.is_accepted());
        assert_eq!(outcome.attempts_used(), 1);
        assert_eq!(outcome.attempts[0].tier, CorrectionTier::LocalFix);
        assert_eq!(outcome.record.total, Some(3.75));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_escalation_fixes_missing_vendor() {
        let mut receipt = coffee_receipt(3.75);
        receipt.vendor = None;

        let fixed = Receipt {
            vendor: Some("Cafe Milano".to_string()),
            ..coffee_receipt(3.75)
        };
        let mock = Arc::new(MockCorrector::new());
        mock.push_reply(fixed);

        let outcome = engine(Some(mock.clone())).reconcile(receipt).await;

        assert!(outcome.is_accepted());
        assert_eq!(outcome.attempts_used(), 1);
        assert_eq!(outcome.attempts[0].tier, CorrectionTier::Escalation);
        assert_eq!(outcome.record.vendor.as_deref(), Some("Cafe Milano"));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_budget_never_exceeded_and_trail_matches() {
        let mut receipt = coffee_receipt(3.75);
        receipt.vendor = None; // forces escalation every round

        // Provider never improves anything
        let mock = Arc::new(MockCorrector::new());
        let outcome = engine(Some(mock.clone())).reconcile(receipt.clone()).await;

        assert!(!outcome.is_accepted());
        assert_eq!(outcome.status, ReconcileStatus::Exhausted);
        assert_eq!(outcome.attempts_used(), 3);
        assert_eq!(mock.call_count(), 3);

        // Exhausted returns the last candidate, still invalid
        assert_eq!(outcome.record.id, receipt.id);
        assert!(!outcome.validation.is_valid);

        // Trail numbering is 1..=attempts_used
        let numbers: Vec<usize> = outcome.attempts.iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_provider_timeout_counts_as_one_attempt() {
        let mut receipt = coffee_receipt(3.75);
        receipt.vendor = None;

        let slow = Arc::new(MockCorrector::new().with_delay(Duration::from_secs(5)));
        let config = ReconcileConfig {
            max_attempts: 1,
            provider_timeout: Duration::from_millis(20),
            ..ReconcileConfig::default()
        };
        let engine = ReconcileEngine::new(config, Some(slow.clone())).unwrap();

        let outcome = engine.reconcile(receipt).await;

        assert_eq!(outcome.status, ReconcileStatus::Exhausted);
        assert_eq!(outcome.attempts_used(), 1);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::ProviderFailure);
        assert!(outcome.attempts[0].changed_fields.is_empty());
        assert_eq!(slow.call_count(), 1); // never retried below the loop
    }

    #[tokio::test]
    async fn test_accepted_trail_ends_with_returned_record() {
        let mock = Arc::new(MockCorrector::new());
        let outcome = engine(Some(mock)).reconcile(coffee_receipt(3.00)).await;

        let last_output = outcome
            .attempts
            .last()
            .and_then(|a| a.output_record.as_ref())
            .unwrap();
        assert_eq!(last_output, &outcome.record);
    }

    #[tokio::test]
    async fn test_revalidating_accepted_record_is_idempotent() {
        let outcome = engine(None).reconcile(coffee_receipt(3.00)).await;
        assert!(outcome.is_accepted());

        let recheck = Validator::new().validate(&outcome.record);
        assert!(recheck.is_valid);
    }

    #[test]
    fn test_zero_max_attempts_fails_fast() {
        let config = ReconcileConfig {
            max_attempts: 0,
            ..ReconcileConfig::default()
        };
        let result = ReconcileEngine::new(config, None);
        assert!(matches!(
            result.err(),
            Some(ReconcileConfigError::InvalidMaxAttempts(0))
        ));
    }

    #[test]
    fn test_negative_tolerance_fails_fast() {
        let config = ReconcileConfig {
            tolerance: -0.5,
            ..ReconcileConfig::default()
        };
        assert!(ReconcileEngine::new(config, None).is_err());
    }

    #[tokio::test]
    async fn test_partial_progress_then_exhaustion() {
        // Two independent problems; provider fixes one per round, budget of 2
        let mut receipt = coffee_receipt(3.00);
        receipt.vendor = None; // missing vendor + wrong total

        let mut halfway = coffee_receipt(3.00);
        halfway.vendor = Some("Cafe".to_string()); // vendor fixed, total still wrong

        let mock = Arc::new(MockCorrector::new());
        mock.push_reply(halfway);

        let config = ReconcileConfig {
            max_attempts: 2,
            provider_timeout: Duration::from_millis(200),
            ..ReconcileConfig::default()
        };
        let engine = ReconcileEngine::new(config, Some(mock.clone())).unwrap();
        let outcome = engine.reconcile(receipt).await;

        // Round 1 escalates (two violations), round 2 local-fixes the total
        assert!(outcome.is_accepted());
        assert_eq!(outcome.attempts_used(), 2);
        assert_eq!(outcome.attempts[0].tier, CorrectionTier::Escalation);
        assert_eq!(outcome.attempts[1].tier, CorrectionTier::LocalFix);
        assert_eq!(outcome.record.total, Some(3.75));
        assert_eq!(mock.call_count(), 1);
    }
}
