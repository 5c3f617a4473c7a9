//! Error types and handling for conformance test execution

use thiserror::Error;
use uuid::Uuid;

/// Main error type for engine operations
#[derive(Debug, Error)]
pub enum CrucibleError {
    /// The requested suite has not been registered with the engine
    #[error("Suite not found: {suite_id}")]
    SuiteNotFound { suite_id: String },

    /// The requested runnable is absent from the effective tree
    /// (unknown id, or excluded by the session's suite options)
    #[error("Runnable not found: {runnable_id}")]
    RunnableNotFound { runnable_id: String },

    /// The runnable exists but may not be targeted directly by a run request
    #[error("Runnable '{runnable_id}' cannot be run directly")]
    NotUserRunnable { runnable_id: String },

    /// One or more required inputs have no value; carries the complete list
    #[error("Missing required inputs: {}", missing.join(", "))]
    RequiredInputsNotFound { missing: Vec<String> },

    /// A suite option is unknown, unassigned without a default, or given a
    /// value outside its enumerated set
    #[error("Invalid suite option '{option_id}': {message}")]
    InvalidOption { option_id: String, message: String },

    /// A wait identifier is already outstanding in the wait registry
    #[error("Wait identifier already in use: {identifier}")]
    DuplicateWaitIdentifier { identifier: String },

    /// No outstanding wait matches the identifier (unknown, already
    /// resolved, or expired)
    #[error("Unknown wait identifier: {identifier}")]
    UnknownWaitIdentifier { identifier: String },

    /// Session lookup failure
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: Uuid },

    /// Run lookup failure
    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: Uuid },

    /// A suite declares the same runnable id twice
    #[error("Duplicate runnable id '{runnable_id}' in suite '{suite_id}'")]
    DuplicateRunnableId {
        suite_id: String,
        runnable_id: String,
    },

    /// Suite definition loading or validation errors
    #[error("Definition error: {message}")]
    DefinitionError { message: String },

    /// A suite definition names a procedure that is not registered
    #[error("Unknown procedure: {name}")]
    UnknownProcedure { name: String },
}

/// Error kind enumeration for categorizing errors at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lookup,
    Validation,
    Wait,
    Definition,
}

impl CrucibleError {
    /// Get the error kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrucibleError::SuiteNotFound { .. }
            | CrucibleError::RunnableNotFound { .. }
            | CrucibleError::SessionNotFound { .. }
            | CrucibleError::RunNotFound { .. } => ErrorKind::Lookup,
            CrucibleError::NotUserRunnable { .. }
            | CrucibleError::RequiredInputsNotFound { .. }
            | CrucibleError::InvalidOption { .. } => ErrorKind::Validation,
            CrucibleError::DuplicateWaitIdentifier { .. }
            | CrucibleError::UnknownWaitIdentifier { .. } => ErrorKind::Wait,
            CrucibleError::DuplicateRunnableId { .. }
            | CrucibleError::DefinitionError { .. }
            | CrucibleError::UnknownProcedure { .. } => ErrorKind::Definition,
        }
    }

    /// Create a suite-not-found error
    pub fn suite_not_found(suite_id: impl Into<String>) -> Self {
        Self::SuiteNotFound {
            suite_id: suite_id.into(),
        }
    }

    /// Create a runnable-not-found error
    pub fn runnable_not_found(runnable_id: impl Into<String>) -> Self {
        Self::RunnableNotFound {
            runnable_id: runnable_id.into(),
        }
    }

    /// Create a not-user-runnable error
    pub fn not_user_runnable(runnable_id: impl Into<String>) -> Self {
        Self::NotUserRunnable {
            runnable_id: runnable_id.into(),
        }
    }

    /// Create a required-inputs error from the complete missing-name list
    pub fn required_inputs_not_found(missing: Vec<String>) -> Self {
        Self::RequiredInputsNotFound { missing }
    }

    /// Create an invalid-option error
    pub fn invalid_option(option_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            option_id: option_id.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate-wait-identifier error
    pub fn duplicate_wait_identifier(identifier: impl Into<String>) -> Self {
        Self::DuplicateWaitIdentifier {
            identifier: identifier.into(),
        }
    }

    /// Create an unknown-wait-identifier error
    pub fn unknown_wait_identifier(identifier: impl Into<String>) -> Self {
        Self::UnknownWaitIdentifier {
            identifier: identifier.into(),
        }
    }

    /// Create a definition error
    pub fn definition_error(message: impl Into<String>) -> Self {
        Self::DefinitionError {
            message: message.into(),
        }
    }

    /// Create an unknown-procedure error
    pub fn unknown_procedure(name: impl Into<String>) -> Self {
        Self::UnknownProcedure { name: name.into() }
    }
}
