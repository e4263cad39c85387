//! Error types for the pillbox_core library.

use std::fmt;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of entity a lookup can miss
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    User,
    Prescription,
    Regimen,
    Dose,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::User => "user",
            Entity::Prescription => "prescription",
            Entity::Regimen => "regimen",
            Entity::Dose => "dose",
        };
        f.write_str(name)
    }
}

/// Coarse classification used by outer layers (CLI exit codes, HTTP status)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Internal,
}

/// Core error type for pillbox_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: u64 },

    /// Schedule violates its invariants (empty, offset outside period, ...)
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Malformed request input (zero counts, zero limit, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage backend failure
    #[error("Store error: {0}")]
    Store(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn not_found(entity: Entity, id: u64) -> Self {
        Error::NotFound { entity, id }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::InvalidSchedule(_) | Error::Validation(_) | Error::Json(_) => {
                ErrorKind::BadRequest
            }
            _ => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
