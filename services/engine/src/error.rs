//! Error types for stack deployment
//!
//! Every failure inside a stack propagates to the top-level deploy
//! operation. There is no partial rollback: the operator re-runs the
//! deploy to converge.

use std::time::Duration;
use thiserror::Error;

use crate::domain::DomainError;
use crate::exchange::ExchangeError;

/// Errors that can occur while deploying a stack
#[derive(Debug, Error)]
pub enum DeployError {
    /// Malformed input or a provider rejecting an inconsistent configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A consumed exchange parameter has not been published yet
    #[error("Dependency not ready: parameter {key} not found in {region}")]
    DependencyNotReady { key: String, region: String },

    /// The caller may not read the producer's scope
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// DNS validation did not complete in time
    #[error("Certificate {arn} still pending validation after {waited:?}")]
    ValidationTimeout { arn: String, waited: Duration },

    /// The whole stack deploy exceeded its budget
    #[error("Stack {stack} deploy timed out after {timeout:?}")]
    StackTimeout { stack: String, timeout: Duration },

    /// An existing resource diverges from the desired state and is not ours to overwrite
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Function source could not be packaged
    #[error("Packaging failed for {function}: {reason}")]
    Packaging { function: String, reason: String },

    /// Provider unavailable or misbehaving
    #[error("Provider error: {0}")]
    Provider(String),

    /// Local state file could not be read or written
    #[error("State error: {0}")]
    State(String),
}

/// Result type for deploy operations
pub type DeployResult<T> = Result<T, DeployError>;

impl DeployError {
    /// Whether re-running the deploy (after fixing ordering or DNS) can succeed.
    ///
    /// Configuration and conflict errors need a human change first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeployError::DependencyNotReady { .. }
                | DeployError::ValidationTimeout { .. }
                | DeployError::StackTimeout { .. }
        )
    }
}

impl From<ExchangeError> for DeployError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::NotFound { key, region } => {
                DeployError::DependencyNotReady { key, region }
            }
            ExchangeError::AccessDenied { .. } => DeployError::AccessDenied(err.to_string()),
            ExchangeError::Unavailable(msg) => DeployError::Provider(msg),
        }
    }
}

impl From<DomainError> for DeployError {
    fn from(err: DomainError) -> Self {
        DeployError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for DeployError {
    fn from(err: serde_json::Error) -> Self {
        DeployError::State(err.to_string())
    }
}

impl From<std::io::Error> for DeployError {
    fn from(err: std::io::Error) -> Self {
        DeployError::State(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_dependency_not_ready() {
        let err: DeployError = ExchangeError::NotFound {
            key: "CognitoCertArn".to_string(),
            region: "us-east-1".to_string(),
        }
        .into();

        assert!(matches!(err, DeployError::DependencyNotReady { .. }));
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Dependency not ready: parameter CognitoCertArn not found in us-east-1"
        );
    }

    #[test]
    fn test_configuration_and_conflict_are_not_retryable() {
        assert!(!DeployError::Configuration("bad".to_string()).is_retryable());
        assert!(!DeployError::Conflict("www.example.com".to_string()).is_retryable());
    }
}
