//! Error taxonomy for the curation engine.
//!
//! Transient failures are retried locally and only surface once retries are
//! exhausted. Validation failures are per-item. A schedule that is not due is
//! not an error at all; see `campaign::SkipReason`.

use thiserror::Error;

use crate::reconcile::SyncReport;

/// Errors produced by the oracle boundary (AI service).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    /// Transport failure, 429 or 5xx. Retryable.
    #[error("transient oracle failure: {0}")]
    Transient(String),

    /// The per-call deadline elapsed. Retryable.
    #[error("oracle call timed out after {0} ms")]
    Timeout(u64),

    /// Response could not be parsed even after the structural re-parse.
    #[error("malformed oracle response: {0}")]
    Malformed(String),

    /// Well-formed response that is missing or has empty required fields.
    #[error("invalid oracle response: {0}")]
    Validation(String),

    /// Non-retryable HTTP rejection (auth, bad request).
    #[error("oracle rejected request with status {0}")]
    Rejected(u16),

    /// No provider configured.
    #[error("oracle disabled")]
    Disabled,
}

impl OracleError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OracleError::Transient(_) | OracleError::Timeout(_))
    }
}

/// Errors produced by the third-party events feed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// 503 / 5xx / 429 or a transport error. Retryable.
    #[error("transient feed failure: {0}")]
    Transient(String),

    #[error("feed rejected request with status {0}")]
    Rejected(u16),

    #[error("malformed feed page: {0}")]
    Malformed(String),
}

impl FeedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Transient(_))
    }
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum CurationError {
    #[error("transient source error: {0}")]
    TransientSource(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// Selection would exceed the section capacity. Guarded by the selector,
    /// so reaching this indicates a bug or a lost race.
    #[error("capacity exceeded for {section}: {attempted} > {capacity}")]
    CapacityExceeded {
        section: String,
        capacity: usize,
        attempted: usize,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The feed was unreachable for the whole window. Carries the partial
    /// counts gathered before giving up.
    #[error("events feed unavailable ({} day(s) failed)", report.days_failed)]
    SourceUnavailable { report: Box<SyncReport> },

    #[error("store error: {0}")]
    Store(String),
}

impl From<OracleError> for CurationError {
    fn from(e: OracleError) -> Self {
        match e {
            OracleError::Transient(m) => CurationError::TransientSource(m),
            OracleError::Timeout(ms) => {
                CurationError::TransientSource(format!("oracle timeout after {ms} ms"))
            }
            OracleError::Malformed(m) => CurationError::MalformedResponse(m),
            OracleError::Validation(m) => CurationError::Validation(m),
            OracleError::Rejected(s) => {
                CurationError::TransientSource(format!("oracle rejected request ({s})"))
            }
            OracleError::Disabled => CurationError::Validation("oracle disabled".to_string()),
        }
    }
}

impl From<FeedError> for CurationError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::Transient(m) => CurationError::TransientSource(m),
            FeedError::Rejected(s) => {
                CurationError::TransientSource(format!("feed rejected request ({s})"))
            }
            FeedError::Malformed(m) => CurationError::MalformedResponse(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, CurationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_timeout_are_retryable() {
        assert!(OracleError::Transient("503".into()).is_retryable());
        assert!(OracleError::Timeout(100).is_retryable());
        assert!(!OracleError::Malformed("x".into()).is_retryable());
        assert!(!OracleError::Validation("empty headline".into()).is_retryable());
        assert!(!OracleError::Rejected(401).is_retryable());
        assert!(FeedError::Transient("503".into()).is_retryable());
        assert!(!FeedError::Rejected(404).is_retryable());
    }

    #[test]
    fn oracle_errors_map_onto_taxonomy() {
        let e: CurationError = OracleError::Malformed("```".into()).into();
        assert!(matches!(e, CurationError::MalformedResponse(_)));
        let e: CurationError = OracleError::Validation("empty".into()).into();
        assert!(matches!(e, CurationError::Validation(_)));
    }
}
