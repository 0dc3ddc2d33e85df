//! Existing-machine backend error types

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExistingError {
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("Machine '{machine}' is missing required field '{field}'")]
    MissingRequiredField {
        machine: String,
        field: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Machine '{machine}': {precondition}")]
    PreconditionFailed {
        machine: String,
        precondition: Precondition,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Machine(#[from] fleetflow_machine::MachineError),

    #[error(transparent)]
    Config(#[from] fleetflow_config::ConfigError),
}

/// A state an operation needs but the machine is not in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// No target host recorded yet; create has never completed
    TargetHostUnset,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::TargetHostUnset => {
                write!(f, "target host is not set (create has not run yet)")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ExistingError>;
