// Orchestrator Errors
// Error kinds surfaced by the core and control-plane client failures

use serde::Serialize;
use std::time::Duration;

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Error codes the control plane returns for throttling or temporary unavailability
pub const TRANSIENT_ERROR_CODES: &[&str] = &[
    "ThrottlingException",
    "Throttling",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "ProvisionedThroughputExceededException",
    "ServiceUnavailableException",
    "ServiceUnavailable",
    "InternalServerErrorException",
    "InternalServerError",
    "InternalFailure",
    "RequestTimeout",
    "RequestTimeoutException",
    "SlowDown",
];

const NOT_FOUND_ERROR_CODES: &[&str] = &[
    "NotFoundException",
    "ResourceNotFoundException",
    "ParameterNotFound",
    "NotFound",
];

const CONFLICT_ERROR_CODES: &[&str] = &[
    "ConflictException",
    "ConditionalCheckFailedException",
];

/// A failed call against an external service, identified by its error code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        TRANSIENT_ERROR_CODES.contains(&self.code.as_str())
    }

    pub fn is_not_found(&self) -> bool {
        NOT_FOUND_ERROR_CODES.contains(&self.code.as_str())
    }

    /// The service rejected a state change that conflicts with an in-flight one
    pub fn is_conflict(&self) -> bool {
        CONFLICT_ERROR_CODES.contains(&self.code.as_str())
    }
}

/// Stable name of an error kind, used in the HTTP envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Timeout,
    UpstreamFailure,
    ValidationFailure,
    PartialFailure,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::UpstreamFailure => "UpstreamFailure",
            ErrorKind::ValidationFailure => "ValidationFailure",
            ErrorKind::PartialFailure => "PartialFailure",
            ErrorKind::Storage => "Storage",
        }
    }
}

/// Errors that can occur while orchestrating destinations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timed out after {}s: {operation}", elapsed.as_secs())]
    Timeout { operation: String, elapsed: Duration },

    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    #[error("Partial failure: {message} ({} step(s) failed)", failures.len())]
    PartialFailure { message: String, failures: Vec<String> },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::NotFound(_) => ErrorKind::NotFound,
            OrchestratorError::InvalidState(_) => ErrorKind::InvalidState,
            OrchestratorError::Timeout { .. } => ErrorKind::Timeout,
            OrchestratorError::UpstreamFailure(_) => ErrorKind::UpstreamFailure,
            OrchestratorError::ValidationFailure(_) => ErrorKind::ValidationFailure,
            OrchestratorError::PartialFailure { .. } => ErrorKind::PartialFailure,
            OrchestratorError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound(_))
    }
}

impl From<ServiceError> for OrchestratorError {
    fn from(err: ServiceError) -> Self {
        if err.is_not_found() {
            OrchestratorError::NotFound(err.to_string())
        } else {
            OrchestratorError::UpstreamFailure(err.to_string())
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Storage(format!("Serialization error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ServiceError::new("ThrottlingException", "slow down").is_transient());
        assert!(ServiceError::new("InternalServerErrorException", "oops").is_transient());
        assert!(!ServiceError::new("BadRequestException", "nope").is_transient());
        assert!(!ServiceError::new("ConflictException", "busy").is_transient());
    }

    #[test]
    fn test_service_error_maps_to_kind() {
        let missing: OrchestratorError = ServiceError::new("NotFoundException", "no channel").into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let denied: OrchestratorError = ServiceError::new("ForbiddenException", "denied").into();
        assert_eq!(denied.kind(), ErrorKind::UpstreamFailure);
        assert!(denied.to_string().contains("ForbiddenException"));
    }
}
