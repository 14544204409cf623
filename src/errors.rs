//! Orchestration error types

use thiserror::Error;

/// Errors raised by orchestration steps and collaborators
#[derive(Debug, Error)]
pub enum OrchestrateError {
    /// A wait or network operation exceeded its deadline
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Transient transport or connection failure
    #[error("network error during {operation}: {reason}")]
    Network { operation: String, reason: String },

    /// An element, page or resource the step requires does not exist
    #[error("{resource} not found: {reason}")]
    NotFound { resource: String, reason: String },

    /// Structural validation failure (input, token format, auth state)
    #[error("validation failed: {0}")]
    Validation(String),

    /// Prerequisite session is not authenticated
    #[error("not authenticated: {method} (confidence {confidence:.0}%)")]
    NotAuthenticated { method: String, confidence: f64 },

    /// No extraction strategy produced a grammar-valid credential
    #[error("credential extraction failed: {0}")]
    Extraction(String),

    /// Resource acquisition failed (browser launch, session dir)
    #[error("failed to acquire {resource}: {reason}")]
    Resource { resource: String, reason: String },

    /// A step failed after the retry budget was exhausted
    #[error("step {step} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        step: String,
        attempts: u32,
        #[source]
        source: Box<OrchestrateError>,
    },

    /// The run was cancelled from outside
    #[error("run cancelled during {0}")]
    Cancelled(String),

    /// Cleanup failure; never escalates to the run outcome
    #[error("cleanup error: {0}")]
    Cleanup(String),

    /// I/O error from persistence or session storage
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error from session or result handling
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Anything the closed classification set does not cover
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestrateError {
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn network(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn resource(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resource {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Unwrap the terminal cause of an exhausted-retries wrapper
    pub fn root_cause(&self) -> &OrchestrateError {
        match self {
            Self::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result alias used throughout the crate
pub type OrchestrateResult<T> = Result<T, OrchestrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_operation() {
        let err = OrchestrateError::timeout("navigate", 30_000);
        assert_eq!(err.to_string(), "navigate timed out after 30000ms");
    }

    #[test]
    fn root_cause_unwraps_retry_wrappers() {
        let inner = OrchestrateError::network("navigate", "connection reset");
        let wrapped = OrchestrateError::RetriesExhausted {
            step: "navigate".into(),
            attempts: 3,
            source: Box::new(inner),
        };
        assert!(matches!(
            wrapped.root_cause(),
            OrchestrateError::Network { .. }
        ));
    }
}
