//! Error types for process supervision

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supervision errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The OS could not launch the process
    #[error("Failed to start {program}: {source}")]
    StartFailure {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process terminated abnormally
    #[error("Process failed: {reason}")]
    RuntimeFailure { reason: String },

    /// A supervisor is already registered under this name
    #[error("Process already registered: {name}")]
    DuplicateName { name: String },

    /// No supervisor is registered under this name
    #[error("Process not found: {name}")]
    NotFound { name: String },

    /// The supervisor has already been started or finalized
    #[error("Process already started: {name}")]
    AlreadyStarted { name: String },

    /// Command description rejected by the builder
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for supervision operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Kind of failure recorded in a [`Status`](crate::Status)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The process could not be launched
    StartFailure,
    /// The process exited abnormally for a reason other than our own stop
    RuntimeFailure,
}

/// Failure attached to a process status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn start(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::StartFailure,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::RuntimeFailure,
            message: message.into(),
        }
    }
}

impl From<&SupervisorError> for Failure {
    fn from(err: &SupervisorError) -> Self {
        match err {
            SupervisorError::StartFailure { .. } => Failure::start(err.to_string()),
            _ => Failure::runtime(err.to_string()),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
