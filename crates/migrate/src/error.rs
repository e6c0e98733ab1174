//! Error types for the migration engine
//!
//! Driver failures are reported as [`DatabaseError`], stage failures as
//! [`MigrationError`], and a failed run surfaces as a single
//! [`MigrationRunError`] that carries the stage error as its source.

use std::io;

use thiserror::Error;

/// Result type alias for database collaborator calls
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Result type alias for engine stages
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error reported by a database backend
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DatabaseError {
    /// Human-readable driver message
    pub message: String,
    /// SQLSTATE code, when the server reported one
    pub code: Option<String>,
}

impl DatabaseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned());

        Self {
            message: err.to_string(),
            code,
        }
    }
}

/// Malformed caller input, detected before any I/O
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: '{value}' (expected {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Missing required configuration: {field}")]
    Missing { field: String },
}

/// Failure to enumerate a migration source
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source as a whole cannot be listed
    #[error("Migration source {location} is unavailable: {source}")]
    Unavailable {
        location: String,
        #[source]
        source: io::Error,
    },

    /// A recognised migration file exists but cannot be read as text
    #[error("Failed to read migration file '{file}': {source}")]
    Unreadable {
        file: String,
        #[source]
        source: io::Error,
    },
}

/// Failure of one stage of a migration run
#[derive(Debug, Clone, Error)]
pub enum MigrationError {
    #[error("Failed to connect to database: {0}")]
    Connection(#[source] DatabaseError),

    #[error("Failed to acquire advisory lock on the migrations ledger: {0}")]
    Lock(#[source] DatabaseError),

    #[error("Failed to read migrations ledger: {0}")]
    LedgerRead(#[source] DatabaseError),

    #[error("Failed to read migration file '{file}': {reason}")]
    UnreadableUnit { file: String, reason: String },

    #[error("Malformed migration '{identity}': {reason}")]
    MalformedUnit { identity: String, reason: String },

    #[error("Found a non-consecutive migration ID on file '{name}': expected {expected}, found {found}")]
    NonConsecutiveId {
        name: String,
        expected: u32,
        found: u32,
    },

    #[error("Hashes don't match for migrations '{}'. This means that the scripts have changed since they were applied.", .names.join("', '"))]
    HashMismatch { names: Vec<String> },

    #[error("An error occurred running migration {id} '{name}': {cause}")]
    MigrationApply {
        id: u32,
        name: String,
        #[source]
        cause: DatabaseError,
    },
}

/// The single error a failed run surfaces to its caller
#[derive(Debug, Clone, Error)]
#[error("Migration failed. Reason: {cause}")]
pub struct MigrationRunError {
    #[source]
    pub cause: MigrationError,
}

impl MigrationRunError {
    pub fn cause(&self) -> &MigrationError {
        &self.cause
    }

    pub fn into_cause(self) -> MigrationError {
        self.cause
    }
}

impl From<MigrationError> for MigrationRunError {
    fn from(cause: MigrationError) -> Self {
        Self { cause }
    }
}
