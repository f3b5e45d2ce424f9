//! Error types for the stack orchestration workflow engine.
//!
//! Two layers are modelled here: [`ServiceError`] describes one failed call
//! against an AWS service, and [`WorkflowError`] is what a handler returns to
//! the state machine that invoked it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error code CloudFormation uses for request validation failures.
const VALIDATION_ERROR: &str = "ValidationError";

/// A failed call against an AWS service.
///
/// The `code` is the service's error code (e.g. `AlreadyExistsException`,
/// `ValidationError`, `ConditionalCheckFailedException`) and `message` is the
/// service's own message. CloudFormation reports most recoverable conditions
/// as a `ValidationError` distinguished only by message text, so the
/// classification helpers below inspect both.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{operation} failed with {code}: {message}")]
pub struct ServiceError {
    /// The API operation that failed, e.g. `UpdateStack`
    pub operation: String,
    /// The service error code
    pub code: String,
    /// The service error message
    pub message: String,
}

impl ServiceError {
    /// Creates a new ServiceError.
    pub fn new(
        operation: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a CloudFormation `ValidationError`.
    pub fn validation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, VALIDATION_ERROR, message)
    }

    /// The stack being created already exists.
    pub fn is_already_exists(&self) -> bool {
        self.code == "AlreadyExistsException" || self.message.contains("already exists")
    }

    /// The stack is in an `*_IN_PROGRESS` state and cannot be updated yet.
    pub fn is_update_in_progress(&self) -> bool {
        self.code == VALIDATION_ERROR
            && self.message.contains("_IN_PROGRESS state and can not be updated")
    }

    /// The update must be retried with `DisableRollback` set.
    pub fn requires_disable_rollback(&self) -> bool {
        self.code == VALIDATION_ERROR
            && self
                .message
                .contains("please use the disable-rollback parameter with update-stack API")
    }

    /// Termination protection cannot change because of the stack's current state.
    pub fn is_termination_protection_locked(&self) -> bool {
        self.message
            .contains("Termination protection cannot be updated due to stack")
    }

    /// The referenced stack does not exist (or was already deleted).
    pub fn is_stack_missing(&self) -> bool {
        self.code == VALIDATION_ERROR && self.message.contains("does not exist")
    }

    /// A DynamoDB condition expression evaluated to false.
    pub fn is_conditional_check_failed(&self) -> bool {
        self.code == "ConditionalCheckFailedException"
    }

    /// The addressed resource (object, rule, topic) was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.code.as_str(),
            "NoSuchKey" | "NotFound" | "ResourceNotFoundException" | "NotFoundException"
        )
    }
}

/// The error type returned by the workflow handlers.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// An AWS call failed and could not be recovered locally.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A stack reached a failure-class status.
    ///
    /// The Display text is the stack's own status reason so the owning state
    /// machine surfaces it verbatim as the execution's failure cause.
    #[error("{reason}")]
    StackFailed {
        /// The stack that failed
        stack_name: String,
        /// The terminal status, e.g. `UPDATE_ROLLBACK_COMPLETE`
        status: String,
        /// CloudFormation's `StackStatusReason`
        reason: String,
    },

    /// No pipeline record matches the execution.
    #[error("Pipeline not found: {pipeline_id}")]
    PipelineNotFound {
        /// The pipeline id parsed from the execution
        pipeline_id: String,
    },

    /// The execution ARN or name could not be mapped to a pipeline.
    #[error("Invalid execution: {message}")]
    InvalidExecution {
        /// What was wrong with the execution identifiers
        message: String,
    },

    /// A parameter or tag value is not a well-formed output reference.
    #[error("Invalid output reference '{reference}': {message}")]
    InvalidReference {
        /// The raw reference string
        reference: String,
        /// Why it could not be parsed
        message: String,
    },

    /// The event or workflow definition is malformed.
    #[error("Validation error: {message}")]
    Validation {
        /// What failed validation
        message: String,
    },

    /// Serialization/deserialization failure.
    #[error("Serialization error: {message}")]
    SerDes {
        /// The underlying serde message
        message: String,
    },

    /// Missing or invalid runtime configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// What is misconfigured
        message: String,
    },

    /// Pipeline teardown could not remove the metadata records.
    #[error("Cleanup failed for pipeline {pipeline_id}: {}", failures.join("; "))]
    Cleanup {
        /// The pipeline being torn down
        pipeline_id: String,
        /// Every cleanup task that failed
        failures: Vec<String>,
    },
}

impl WorkflowError {
    /// Creates a new Validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a new InvalidReference error.
    pub fn invalid_reference(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Returns the wrapped service error, if any.
    pub fn as_service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(error) => Some(error),
            _ => None,
        }
    }

    /// Returns true if this error carries a terminal stack failure.
    pub fn is_stack_failure(&self) -> bool {
        matches!(self, Self::StackFailed { .. })
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerDes {
            message: error.to_string(),
        }
    }
}
