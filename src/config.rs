// ⚙️ Configuration - Environment-driven settings
// Malformed values fail fast at load time; nothing limps along with a
// half-parsed configuration.

use crate::reconcile::ReconcileConfig;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Mistral API key; without it only the local-fix tier runs
    pub mistral_api_key: Option<String>,

    /// Model for extraction and correction calls
    pub model: String,

    /// Path to the SQLite receipt archive
    pub db_path: PathBuf,

    pub tolerance: f64,
    pub max_attempts: usize,
    pub provider_timeout: Duration,
}

impl AppConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tolerance = parse_var(&lookup, "RECEIPT_TOLERANCE", 0.01)?;
        let max_attempts = parse_var(&lookup, "RECEIPT_MAX_ATTEMPTS", 3usize)?;
        let timeout_secs = parse_var(&lookup, "RECEIPT_PROVIDER_TIMEOUT_SECS", 30u64)?;

        if tolerance <= 0.0 {
            return Err(ConfigError::InvalidValue {
                var: "RECEIPT_TOLERANCE".to_string(),
                value: tolerance.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if max_attempts < 1 {
            return Err(ConfigError::InvalidValue {
                var: "RECEIPT_MAX_ATTEMPTS".to_string(),
                value: max_attempts.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(AppConfig {
            mistral_api_key: lookup("MISTRAL_API_KEY").filter(|k| !k.trim().is_empty()),
            model: lookup("RECEIPT_MODEL")
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "mistral-large-latest".to_string()),
            db_path: lookup("RECEIPT_DB")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("receipts.db")),
            tolerance,
            max_attempts,
            provider_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Reconciliation settings derived from this configuration
    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            tolerance: self.tolerance,
            max_attempts: self.max_attempts,
            provider_timeout: self.provider_timeout,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value: raw.clone(),
                reason: "not a valid number".to_string(),
            })
        }
        _ => Ok(default),
    }
}

// ============================================================================
// TESTS
// ============================================================================
