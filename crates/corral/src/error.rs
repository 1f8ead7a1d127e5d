//! Error types for corral

use thiserror::Error;

/// Result type alias for corral operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all corral operations
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A denylisted query operator was found in a caller-supplied filter.
    #[error("Dangerous MongoDB operator detected in filter: {0}")]
    DangerousOperator(String),

    /// A by-id lookup received a string that is not a valid ObjectId.
    #[error("Invalid document id: {0}")]
    InvalidId(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error was raised by the filter sanitizer.
    ///
    /// Lets callers discriminate a rejected filter from a generic driver
    /// failure without matching on the enum.
    pub fn is_dangerous_operator(&self) -> bool {
        matches!(self, Error::DangerousOperator(_))
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(err: mongodb::error::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for Error {
    fn from(err: bson::ser::Error) -> Self {
        Error::Serialization(format!("BSON serialization error: {}", err))
    }
}

impl From<bson::de::Error> for Error {
    fn from(err: bson::de::Error) -> Self {
        Error::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

impl From<bson::oid::Error> for Error {
    fn from(err: bson::oid::Error) -> Self {
        Error::InvalidId(err.to_string())
    }
}
