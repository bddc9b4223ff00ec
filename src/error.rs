//! Error taxonomy for the scan control loop
//!
//! Most failures are recoverable: they are folded into an
//! [`ExecutionRecord`](crate::sandbox::ExecutionRecord) or a safe default
//! decision and the loop keeps going. Only `InvariantViolation` aborts a run.

use thiserror::Error;

/// Errors raised by the scan pipeline
#[derive(Debug, Error)]
pub enum ScanError {
    /// Target, command, or payload failed the security gate. The step is
    /// skipped, never executed.
    #[error("validation rejected: {0}")]
    ValidationRejected(String),

    /// Concurrency ceiling reached for this principal. The step is skipped;
    /// the caller may retry later.
    #[error("admission denied for principal '{principal}' (limit {limit})")]
    AdmissionDenied { principal: String, limit: usize },

    /// Hard wall-clock timeout exceeded; the process group was terminated.
    #[error("execution timed out after {0} seconds")]
    ExecutionTimeout(u64),

    /// Non-zero exit or launch error.
    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    /// The decision collaborator failed or returned unparsable text. A safe
    /// default decision is substituted.
    #[error("decision unavailable: {0}")]
    DecisionUnavailable(String),

    /// No usable plan could be obtained. The built-in fallback plan is
    /// substituted.
    #[error("planning unavailable: {0}")]
    PlanningUnavailable(String),

    /// Internal invariant broken (e.g. governor release without a matching
    /// admit). Fatal: the run aborts with state captured for diagnosis.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ScanError {
    /// Whether the loop may continue past this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvariantViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ScanError::ExecutionTimeout(30).is_recoverable());
        assert!(ScanError::DecisionUnavailable("bad json".into()).is_recoverable());
        assert!(!ScanError::InvariantViolation("release without admit".into()).is_recoverable());
    }

    #[test]
    fn test_display_includes_principal() {
        let err = ScanError::AdmissionDenied {
            principal: "user1".into(),
            limit: 5,
        };
        assert!(err.to_string().contains("user1"));
    }
}
