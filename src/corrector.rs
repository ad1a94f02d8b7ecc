// 🔧 Corrector - Two-tier receipt correction
// Tier 1: deterministic local arithmetic fix, no external calls.
// Tier 2: escalation to the LLM correction provider, bounded by a timeout.
//
// Every attempt yields a new immutable receipt value; a candidate that does
// not strictly reduce the violation count is rejected, which guards the
// reconciliation loop against oscillation.

use crate::providers::CorrectionProvider;
use crate::receipt::{fields, round_cents, Receipt};
use crate::validator::{Validator, Violation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// CORRECTION ATTEMPT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionTier {
    /// Recomputed arithmetically from the line items, no external call
    LocalFix,

    /// Delegated to the external correction provider
    Escalation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// Candidate strictly reduced the violation count and was adopted
    Applied,

    /// Candidate did not reduce the violation count and was discarded
    Rejected,

    /// Provider timed out, errored, or replied with something unparsable
    ProviderFailure,
}

/// One entry in the reconciliation audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionAttempt {
    pub attempt_number: usize,
    pub tier: CorrectionTier,
    pub outcome: AttemptOutcome,
    pub input_record: Receipt,
    /// Absent when the provider call failed outright
    pub output_record: Option<Receipt>,
    pub changed_fields: Vec<String>,
    /// Rejection or failure detail, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CorrectionAttempt {
    /// The record the loop should validate next
    pub fn next_candidate(&self) -> Option<&Receipt> {
        match self.outcome {
            AttemptOutcome::Applied => self.output_record.as_ref(),
            _ => None,
        }
    }
}

// ============================================================================
// CORRECTOR
// ============================================================================

pub struct Corrector {
    validator: Validator,
    provider: Option<Arc<dyn CorrectionProvider>>,
    provider_timeout: Duration,
}

impl Corrector {
    pub fn new(
        tolerance: f64,
        provider: Option<Arc<dyn CorrectionProvider>>,
        provider_timeout: Duration,
    ) -> Self {
        Corrector {
            validator: Validator::with_tolerance(tolerance),
            provider,
            provider_timeout,
        }
    }

    /// Produce the next correction attempt for a receipt and its violations
    ///
    /// Tries the local arithmetic fix first; escalates only when the local
    /// tier does not apply. The provider call is the sole suspension point
    /// and is never retried here - the loop's budget is the retry policy.
    pub async fn correct(
        &self,
        attempt_number: usize,
        receipt: &Receipt,
        violations: &[Violation],
    ) -> CorrectionAttempt {
        if let Some(fixed) = self.try_local_fix(receipt, violations) {
            debug!(attempt = attempt_number, "Local arithmetic fix applied");
            let changed_fields = receipt.diff_fields(&fixed);
            return CorrectionAttempt {
                attempt_number,
                tier: CorrectionTier::LocalFix,
                outcome: AttemptOutcome::Applied,
                input_record: receipt.clone(),
                output_record: Some(fixed),
                changed_fields,
                note: None,
            };
        }

        self.escalate(attempt_number, receipt, violations).await
    }

    /// Tier 1: recompute a single inconsistent summary field
    ///
    /// Applies only when every violation sits on exactly one of
    /// {subtotal, tax, total} and the line items themselves are consistent -
    /// then that one field is recomputable from the rest of the receipt.
    fn try_local_fix(&self, receipt: &Receipt, violations: &[Violation]) -> Option<Receipt> {
        if violations.is_empty() {
            return None;
        }

        let summary_fields: BTreeSet<&str> = violations
            .iter()
            .map(|v| v.field.as_str())
            .collect();

        let all_summary = summary_fields
            .iter()
            .all(|f| matches!(*f, fields::SUBTOTAL | fields::TAX | fields::TOTAL));
        if !all_summary || summary_fields.len() != 1 {
            return None;
        }

        let field = summary_fields.into_iter().next()?;
        let fixed = match field {
            fields::SUBTOTAL => receipt.with_field(fields::SUBTOTAL, receipt.computed_subtotal()),
            fields::TOTAL => receipt.with_field(fields::TOTAL, receipt.computed_total()),
            fields::TAX => {
                let total = receipt.total?;
                let tax = round_cents(total - receipt.computed_subtotal());
                if tax < 0.0 {
                    return None;
                }
                receipt.with_field(fields::TAX, tax)
            }
            _ => return None,
        };

        // The recomputed field must actually converge
        let report = self.validator.validate(&fixed);
        if report.violations.len() < violations.len() {
            Some(fixed)
        } else {
            None
        }
    }

    /// Tier 2: ask the external provider for a corrected receipt
    async fn escalate(
        &self,
        attempt_number: usize,
        receipt: &Receipt,
        violations: &[Violation],
    ) -> CorrectionAttempt {
        let failure = |note: String| CorrectionAttempt {
            attempt_number,
            tier: CorrectionTier::Escalation,
            outcome: AttemptOutcome::ProviderFailure,
            input_record: receipt.clone(),
            output_record: None,
            changed_fields: Vec::new(),
            note: Some(note),
        };

        let provider = match &self.provider {
            Some(provider) => provider,
            None => {
                warn!(attempt = attempt_number, "No correction provider configured");
                return failure("no correction provider configured".to_string());
            }
        };

        let call = provider.propose_correction(receipt, violations);
        let candidate = match tokio::time::timeout(self.provider_timeout, call).await {
            Err(_) => {
                warn!(
                    attempt = attempt_number,
                    timeout_ms = self.provider_timeout.as_millis() as u64,
                    "Correction provider timed out"
                );
                return failure(format!(
                    "provider timed out after {}ms",
                    self.provider_timeout.as_millis()
                ));
            }
            Ok(Err(error)) => {
                warn!(attempt = attempt_number, %error, "Correction provider failed");
                return failure(format!("provider error: {}", error));
            }
            Ok(Ok(mut candidate)) => {
                // Identity survives correction
                candidate.id = receipt.id.clone();
                candidate
            }
        };

        let report = self.validator.validate(&candidate);
        let changed_fields = receipt.diff_fields(&candidate);

        if report.violations.len() < violations.len() {
            debug!(
                attempt = attempt_number,
                remaining = report.violations.len(),
                "Escalated correction applied"
            );
            CorrectionAttempt {
                attempt_number,
                tier: CorrectionTier::Escalation,
                outcome: AttemptOutcome::Applied,
                input_record: receipt.clone(),
                output_record: Some(candidate),
                changed_fields,
                note: None,
            }
        } else {
            warn!(
                attempt = attempt_number,
                before = violations.len(),
                after = report.violations.len(),
                "Candidate rejected: no strict reduction in violations"
            );
            CorrectionAttempt {
                attempt_number,
                tier: CorrectionTier::Escalation,
                outcome: AttemptOutcome::Rejected,
                input_record: receipt.clone(),
                output_record: Some(candidate),
                changed_fields,
                note: Some(format!(
                    "candidate has {} violation(s), input had {}",
                    report.violations.len(),
                    violations.len()
                )),
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
    use crate::providers::mock::MockCorrector;
    use crate::receipt::LineItem;

    fn coffee_with_total(total: f64) -> Receipt {
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

    fn corrector_with(provider: Option<Arc<dyn CorrectionProvider>>) -> Corrector {
        Corrector::new(0.01, provider, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_wrong_total_fixed_locally_without_provider_call() {
        let mock = Arc::new(MockCorrector::new());
        let corrector = corrector_with(Some(mock.clone()));

        let receipt = coffee_with_total(3.00);
        let violations = Validator::new().validate(&receipt).violations;

        let attempt = corrector.correct(1, &receipt, &violations).await;

        assert_eq!(attempt.tier, CorrectionTier::LocalFix);
        assert_eq!(attempt.outcome, AttemptOutcome::Applied);
        assert_eq!(attempt.changed_fields, vec![fields::TOTAL.to_string()]);
        assert_eq!(attempt.next_candidate().unwrap().total, Some(3.75));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_subtotal_fixed_locally() {
        let mut receipt = coffee_with_total(3.75);
        receipt.subtotal = Some(4.00);
        // total still checks out against items + tax, only subtotal is off
        let violations = Validator::new().validate(&receipt).violations;
        assert_eq!(violations.len(), 1);

        let corrector = corrector_with(None);
        let attempt = corrector.correct(1, &receipt, &violations).await;

        assert_eq!(attempt.tier, CorrectionTier::LocalFix);
        assert_eq!(attempt.next_candidate().unwrap().subtotal, Some(3.50));
    }

    #[tokio::test]
    async fn test_item_level_violation_escalates() {
        let mut receipt = coffee_with_total(3.75);
        receipt.line_items[0].amount = 4.00; // disagrees with 1 x 3.50
        let violations = Validator::new().validate(&receipt).violations;

        let mock = Arc::new(MockCorrector::new());
        mock.push_reply(coffee_with_total(3.75));
        let corrector = corrector_with(Some(mock.clone()));

        let attempt = corrector.correct(1, &receipt, &violations).await;

        assert_eq!(attempt.tier, CorrectionTier::Escalation);
        assert_eq!(attempt.outcome, AttemptOutcome::Applied);
        assert_eq!(mock.call_count(), 1);
        // identity preserved across the provider round trip
        assert_eq!(attempt.next_candidate().unwrap().id, receipt.id);
    }

    #[tokio::test]
    async fn test_non_improving_candidate_is_rejected() {
        let receipt = coffee_with_total(3.00);
        let mut violations = Validator::new().validate(&receipt).violations;
        // force escalation by adding a missing-vendor violation
        violations.push(Violation::missing(fields::VENDOR));

        let mut still_wrong = coffee_with_total(2.00);
        still_wrong.vendor = None; // neither problem addressed
        let mock = Arc::new(MockCorrector::new());
        mock.push_reply(still_wrong);
        let corrector = corrector_with(Some(mock));

        let attempt = corrector.correct(1, &receipt, &violations).await;

        assert_eq!(attempt.outcome, AttemptOutcome::Rejected);
        assert!(attempt.next_candidate().is_none());
        assert!(attempt.note.unwrap().contains("violation"));
    }

    #[tokio::test]
    async fn test_provider_error_is_a_failure_with_no_changes() {
        let mut receipt = coffee_with_total(3.75);
        receipt.vendor = None;
        let violations = Validator::new().validate(&receipt).violations;

        let mock = Arc::new(MockCorrector::new());
        mock.push_error("upstream 503");
        let corrector = corrector_with(Some(mock));

        let attempt = corrector.correct(1, &receipt, &violations).await;

        assert_eq!(attempt.outcome, AttemptOutcome::ProviderFailure);
        assert!(attempt.output_record.is_none());
        assert!(attempt.changed_fields.is_empty());
    }

    #[tokio::test]
    async fn test_provider_timeout_is_a_failure() {
        let mut receipt = coffee_with_total(3.75);
        receipt.vendor = None;
        let violations = Validator::new().validate(&receipt).violations;

        let mock = Arc::new(MockCorrector::new().with_delay(Duration::from_secs(5)));
        mock.push_reply(coffee_with_total(3.75));
        let corrector = Corrector::new(0.01, Some(mock), Duration::from_millis(20));

        let attempt = corrector.correct(1, &receipt, &violations).await;

        assert_eq!(attempt.outcome, AttemptOutcome::ProviderFailure);
        assert!(attempt.note.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_provider_is_a_failure() {
        let mut receipt = coffee_with_total(3.75);
        receipt.vendor = None;
        let violations = Validator::new().validate(&receipt).violations;

        let corrector = corrector_with(None);
        let attempt = corrector.correct(1, &receipt, &violations).await;

        assert_eq!(attempt.outcome, AttemptOutcome::ProviderFailure);
        assert!(attempt.note.unwrap().contains("no correction provider"));
    }
}
