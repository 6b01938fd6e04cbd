//! Error types for the migration engine
//!
//! Every failure the engine can report maps onto one variant here. None of them
//! are retried; callers turn them into a non-zero exit status.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The database could not be reached
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The migrations directory does not exist
    #[error("Migrations directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    /// A discovered file or ledger row has no loadable script
    #[error("Unresolved migration script '{migration}': {reason}")]
    UnresolvedScript { migration: String, reason: String },

    /// A statement issued by a script's `up` or `down` failed
    #[error("Failed to execute migration {migration}: {message} (statement: {statement})")]
    Execution {
        migration: String,
        statement: String,
        message: String,
    },

    /// The ledger already holds a row for this migration
    #[error("Migration {0} is already recorded in the ledger")]
    DuplicateMigration(String),

    /// The ledger holds no row for this migration
    #[error("Migration {0} is not recorded in the ledger")]
    NotFound(String),

    /// A caller-supplied argument was malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Ledger query failure that is not a connection problem
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Create a new connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new unresolved script error
    pub fn unresolved(migration: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnresolvedScript {
            migration: migration.into(),
            reason: reason.into(),
        }
    }

    /// Create a new execution error for a failed statement
    pub fn execution(
        migration: impl Into<String>,
        statement: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Execution {
            migration: migration.into(),
            statement: statement.into(),
            message: message.into(),
        }
    }

    /// Whether this error means a script could not be resolved
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::UnresolvedScript { .. })
    }

    /// Classify a driver error raised while talking to the ledger
    pub(crate) fn from_sqlx(err: sqlx::Error, context: &str) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::connection(format!("{}: {}", context, err)),
            other => Self::Database(format!("{}: {}", context, other)),
        }
    }
}
