//! Migration ledger - the persisted record of applied migrations
//!
//! Rows are only ever inserted (when `up` succeeds) or deleted (when `down`
//! succeeds). Insertion order, not batch number, defines "most recent".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{MigrationError, MigrationResult};

/// Default ledger table name
pub const DEFAULT_LEDGER_TABLE: &str = "migrations";

/// One applied migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Insertion order
    pub id: i64,
    /// Migration filename
    pub migration: String,
    /// Batch the migration was applied in
    pub batch: i32,
    /// When the migration was applied
    pub applied_at: DateTime<Utc>,
}

/// Ledger mutation paired with a migration's statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerChange {
    /// Insert a row for the migration under `batch`
    Record { batch: i32 },
    /// Delete the migration's row
    Erase,
}

/// Storage for the migration ledger
///
/// Implementations execute a migration's statements and the matching ledger
/// change through [`apply`](LedgerStore::apply). Stores backed by an engine
/// with transactional DDL run both in one transaction.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the ledger table if it does not exist
    async fn ensure_table(&self) -> MigrationResult<()>;

    /// All ledger rows in insertion order (oldest first)
    async fn entries(&self) -> MigrationResult<Vec<LedgerEntry>>;

    /// Execute `statements` for `migration`, then apply `change` to the ledger
    ///
    /// Fails with [`MigrationError::Execution`] naming the first statement the
    /// database rejected, [`MigrationError::DuplicateMigration`] when recording
    /// an existing row, or [`MigrationError::NotFound`] when erasing a missing one.
    async fn apply(
        &self,
        migration: &str,
        statements: &[String],
        change: LedgerChange,
    ) -> MigrationResult<()>;

    /// Filenames of all applied migrations
    async fn list_applied(&self) -> MigrationResult<BTreeSet<String>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .map(|entry| entry.migration)
            .collect())
    }

    /// Highest batch number in the ledger, 0 when empty
    async fn current_batch(&self) -> MigrationResult<i32> {
        Ok(self
            .entries()
            .await?
            .iter()
            .map(|entry| entry.batch)
            .max()
            .unwrap_or(0))
    }

    /// Batch number for the next `run`
    async fn next_batch(&self) -> MigrationResult<i32> {
        Ok(self.current_batch().await? + 1)
    }

    /// Record a migration without executing anything
    async fn record(&self, migration: &str, batch: i32) -> MigrationResult<()> {
        self.apply(migration, &[], LedgerChange::Record { batch })
            .await
    }

    /// Erase a migration's row without executing anything
    async fn erase(&self, migration: &str) -> MigrationResult<()> {
        self.apply(migration, &[], LedgerChange::Erase).await
    }

    /// The `count` most recently inserted migrations, newest first
    async fn most_recent(&self, count: usize) -> MigrationResult<Vec<String>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .rev()
            .take(count)
            .map(|entry| entry.migration)
            .collect())
    }

    /// Migrations applied in `batch`, newest first
    async fn entries_for_batch(&self, batch: i32) -> MigrationResult<Vec<String>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .rev()
            .filter(|entry| entry.batch == batch)
            .map(|entry| entry.migration)
            .collect())
    }

    /// Every migration in the ledger, newest first
    async fn all_newest_first(&self) -> MigrationResult<Vec<String>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .rev()
            .map(|entry| entry.migration)
            .collect())
    }
}

/// Validate a ledger table name
///
/// Only plain identifiers are accepted since the name is interpolated into SQL.
pub fn validate_table_name(name: &str) -> MigrationResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid && name.len() <= 63 {
        Ok(())
    } else {
        Err(MigrationError::InvalidArgument(format!(
            "invalid ledger table name '{}'",
            name
        )))
    }
}
