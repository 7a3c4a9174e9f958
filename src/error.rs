// Valuation error taxonomy
// Rejections are raised to the caller; recoverable conditions are absorbed
// by the component that hits them and surfaced as flags on the output.

use thiserror::Error;

/// Result type for valuation operations
pub type Result<T> = std::result::Result<T, ValuationError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValuationError {
    /// Ledger missing or corrupt. The index is unusable, the process keeps running.
    #[error("ledger data unavailable: {0}")]
    DataUnavailable(String),

    /// Subject lacks a mandatory field (caller error)
    #[error("insufficient input: {0}")]
    InsufficientInput(String),

    /// Triangulation was asked to blend zero signals
    #[error("no value estimates available to triangulate")]
    NoEstimatesAvailable,

    /// Batched enrichment did not answer within the request budget
    #[error("enrichment timed out after {after_ms} ms")]
    EnrichmentTimeout { after_ms: u64 },

    /// Batched enrichment collaborator returned an error
    #[error("enrichment failed: {0}")]
    EnrichmentFailed(String),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),
}

impl ValuationError {
    /// True for conditions that must reject the whole request
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ValuationError::InsufficientInput(_)
                | ValuationError::NoEstimatesAvailable
                | ValuationError::Config(_)
        )
    }
}
