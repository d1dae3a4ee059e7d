//! Error types for the deployment orchestrator

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("No free port in range {base}..{end}")]
    NoFreePort { base: u16, end: u32 },

    #[error("Spawn error: {0}")]
    SpawnError(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Registry IO error: {0}")]
    RegistryIoError(String),

    #[error("Deployment not found: {0}")]
    NotFound(String),

    #[error("Configuration not found: {0}")]
    ConfigNotFound(String),

    #[error("Unknown owner: {0}")]
    UnknownOwner(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Invalid transition: {0}")]
    TransitionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable error classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoFreePort,
    SpawnFailed,
    ProcessNotFound,
    RegistryIo,
    NotFound,
    ConfigNotFound,
    UnknownOwner,
    InvalidRequest,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoFreePort => "no_free_port",
            ErrorKind::SpawnFailed => "spawn_failed",
            ErrorKind::ProcessNotFound => "process_not_found",
            ErrorKind::RegistryIo => "registry_io",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ConfigNotFound => "config_not_found",
            ErrorKind::UnknownOwner => "unknown_owner",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OrchestratorError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::NoFreePort { .. } => ErrorKind::NoFreePort,
            OrchestratorError::SpawnError(_) => ErrorKind::SpawnFailed,
            OrchestratorError::ProcessNotFound(_) => ErrorKind::ProcessNotFound,
            OrchestratorError::RegistryIoError(_) => ErrorKind::RegistryIo,
            OrchestratorError::NotFound(_) => ErrorKind::NotFound,
            OrchestratorError::ConfigNotFound(_) => ErrorKind::ConfigNotFound,
            OrchestratorError::UnknownOwner(_) => ErrorKind::UnknownOwner,
            OrchestratorError::ValidationError(_) => ErrorKind::InvalidRequest,
            OrchestratorError::IoError(_)
            | OrchestratorError::JsonError(_)
            | OrchestratorError::ConfigError(_)
            | OrchestratorError::ServerError(_)
            | OrchestratorError::ShutdownError(_)
            | OrchestratorError::TransitionError(_)
            | OrchestratorError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Human-readable reason safe to show to end users.
    ///
    /// Never includes process ids, file paths or OS error text.
    pub fn user_message(&self) -> String {
        match self {
            OrchestratorError::NoFreePort { .. } => {
                "Cannot publish now: all deployment ports are in use.".to_string()
            }
            OrchestratorError::SpawnError(_) => {
                "The chatbot process could not be started.".to_string()
            }
            OrchestratorError::ProcessNotFound(_) => {
                "The chatbot process is no longer running.".to_string()
            }
            OrchestratorError::RegistryIoError(_) => {
                "Deployment records are temporarily unavailable.".to_string()
            }
            OrchestratorError::NotFound(_) => "Deployment not found.".to_string(),
            OrchestratorError::ConfigNotFound(_) => {
                "No saved configuration exists for this chatbot.".to_string()
            }
            OrchestratorError::UnknownOwner(_) => "Unknown account.".to_string(),
            OrchestratorError::ValidationError(msg) => format!("Invalid request: {}", msg),
            _ => "Internal error.".to_string(),
        }
    }
}
