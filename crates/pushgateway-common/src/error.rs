//! Error types for the Pushgateway operator
//!
//! Errors are structured with fields so that a failed pass can be traced back
//! to the instance and the sub-step that failed.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Pushgateway operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid Pushgateway spec
    #[error("validation error for {instance}: {message}")]
    Validation {
        /// Instance key (`namespace/name`)
        instance: String,
        /// Description of what's invalid
        message: String,
    },

    /// An object the pass depends on does not exist (yet)
    #[error("{kind} {name} not found")]
    DependencyNotFound {
        /// Kind of the missing object
        kind: String,
        /// `namespace/name` of the missing object
        name: String,
    },

    /// A Cluster Store call did not finish in time
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        /// Operation that was cut off
        operation: String,
        /// Configured limit
        after: Duration,
    },

    /// Serialization/deserialization error
    #[error("serialization error for {kind}: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized
        kind: String,
    },

    /// Job/CronJob injection failure
    #[error("injection error for {workload}: {message}")]
    Injection {
        /// `namespace/name` of the workload
        workload: String,
        /// Description of what failed
        message: String,
        /// Whether another pass may succeed
        retryable: bool,
    },

    /// A sub-step of a reconciliation pass failed
    #[error("{instance}: {step} failed: {source}")]
    Step {
        /// Instance key (`namespace/name`)
        instance: String,
        /// Sub-step that failed (e.g. "update Deployment")
        step: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a validation error without instance context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            instance: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a specific instance
    pub fn validation_for(instance: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            instance: instance.into(),
            message: msg.into(),
        }
    }

    /// Create a dependency-not-found error
    pub fn dependency_not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DependencyNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: kind.into(),
        }
    }

    /// Create a retryable injection error
    pub fn injection(workload: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Injection {
            workload: workload.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Wrap this error with the instance and the sub-step that produced it
    pub fn in_step(self, instance: impl Into<String>, step: impl Into<String>) -> Self {
        Self::Step {
            instance: instance.into(),
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec change. Conflicts,
    /// throttling, server errors and transport failures go away on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    ae.code == 409 || ae.code == 429 || !(400..500).contains(&ae.code)
                }
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::DependencyNotFound { .. } => true,
            Error::Timeout { .. } => true,
            Error::Serialization { .. } => false,
            Error::Injection { retryable, .. } => *retryable,
            Error::Step { source, .. } => source.is_retryable(),
        }
    }

    /// Check if this error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            Error::Step { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error is a 409 `AlreadyExists` from a create
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409 && ae.reason == "AlreadyExists",
            Error::Step { source, .. } => source.is_already_exists(),
            _ => false,
        }
    }

    /// Get the instance key if this error is tied to one
    pub fn instance(&self) -> Option<&str> {
        match self {
            Error::Validation { instance, .. } => Some(instance),
            Error::Step { instance, .. } => Some(instance),
            _ => None,
        }
    }
}

/// Build a `kube::Error::Api` with the given status code, as the API server would
pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}
