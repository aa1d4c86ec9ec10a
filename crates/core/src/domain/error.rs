// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid run state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, DomainError>;
