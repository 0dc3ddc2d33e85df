//! Machine backend error types

use thiserror::Error;

/// Errors shared by every machine backend
#[derive(Error, Debug)]
pub enum MachineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("SSH key generation failed: {0}")]
    KeyGeneration(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MachineError>;
