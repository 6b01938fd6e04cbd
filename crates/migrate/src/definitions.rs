//! Migration Definitions - Core types shared by the runner and its callers
//!
//! Defines MigrationConfig, the rollback selection modes, and the reports
//! returned by `run`, `rollback`, `reset` and `status`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::error::{MigrationError, MigrationResult};
use crate::ledger::DEFAULT_LEDGER_TABLE;

/// Configuration for the migration engine
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
    /// Table name for tracking migrations
    pub migrations_table: String,
    /// Wrap each migration in a transaction when the store supports it
    pub transactional: bool,
    /// File extensions considered migrations
    pub extensions: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            migrations_table: DEFAULT_LEDGER_TABLE.to_string(),
            transactional: true,
            extensions: vec!["sql".to_string(), "rs".to_string()],
        }
    }
}

impl MigrationConfig {
    /// Default configuration rooted at `dir`
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: dir.into(),
            ..Self::default()
        }
    }
}

/// Result of running migrations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Batch number assigned to this run
    pub batch: i32,
    /// Filenames applied, in order
    pub applied: Vec<String>,
    /// Filenames skipped because no script could be resolved
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Result of rolling back migrations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Filenames rolled back, newest first
    pub rolled_back: Vec<String>,
}

impl RollbackReport {
    pub fn is_noop(&self) -> bool {
        self.rolled_back.is_empty()
    }
}

/// Which ledger rows a rollback selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollbackMode {
    /// Every row of the highest batch
    #[default]
    Batch,
    /// The given number of most recently inserted rows, across batches
    Steps(usize),
}

impl RollbackMode {
    /// Build a step-mode rollback; `steps` must be positive
    pub fn steps(steps: i64) -> MigrationResult<Self> {
        if steps <= 0 {
            return Err(MigrationError::InvalidArgument(format!(
                "step count must be a positive integer, got {}",
                steps
            )));
        }
        usize::try_from(steps)
            .map(RollbackMode::Steps)
            .map_err(|_| MigrationError::InvalidArgument(format!("step count {} is too large", steps)))
    }

    /// Parse the value of a `--step` option; `None` selects batch mode
    pub fn from_step_arg(step: Option<&str>) -> MigrationResult<Self> {
        match step {
            None => Ok(RollbackMode::Batch),
            Some(raw) => {
                let steps: i64 = raw.trim().parse().map_err(|_| {
                    MigrationError::InvalidArgument(format!(
                        "step count must be a positive integer, got '{}'",
                        raw
                    ))
                })?;
                Self::steps(steps)
            }
        }
    }
}

/// State of a single migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied {
        /// Batch number
        batch: i32,
        /// When it was applied
        applied_at: DateTime<Utc>,
    },
    /// Recorded in the ledger but its file is gone
    Missing {
        batch: i32,
        applied_at: DateTime<Utc>,
    },
}

/// One line of `status` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatusEntry {
    pub migration: String,
    #[serde(flatten)]
    pub status: MigrationStatus,
}
