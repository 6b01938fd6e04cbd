//! PostgreSQL ledger store
//!
//! Backed by a single-connection sqlx pool that is opened lazily on first use
//! and held for the rest of the process.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};

use crate::error::{MigrationError, MigrationResult};
use crate::ledger::{validate_table_name, LedgerChange, LedgerEntry, LedgerStore};

/// SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// Ledger stored in a PostgreSQL table
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
    table: String,
    transactional: bool,
}

impl PgLedger {
    /// Create a store on an existing pool
    pub fn new(pool: PgPool, table: &str) -> MigrationResult<Self> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
            transactional: true,
        })
    }

    /// Create a store from a database URL without connecting yet
    pub fn connect_lazy(database_url: &str, table: &str) -> MigrationResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(database_url)
            .map_err(|e| MigrationError::from_sqlx(e, "Invalid database URL"))?;
        Self::new(pool, table)
    }

    /// Whether each migration body runs inside a transaction (default: true)
    ///
    /// When disabled, statements auto-commit one by one and a failure leaves
    /// earlier statements of the same migration applied.
    pub fn with_transactions(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// SQL to create the ledger table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id BIGSERIAL PRIMARY KEY,\n    \
                migration TEXT NOT NULL UNIQUE,\n    \
                batch INTEGER NOT NULL,\n    \
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP\n\
            )",
            self.table
        )
    }

    fn entries_sql(&self) -> String {
        format!(
            "SELECT id, migration, batch, created_at FROM {} ORDER BY id ASC",
            self.table
        )
    }

    fn current_batch_sql(&self) -> String {
        format!("SELECT COALESCE(MAX(batch), 0) AS batch FROM {}", self.table)
    }

    fn most_recent_sql(&self) -> String {
        format!(
            "SELECT migration FROM {} ORDER BY id DESC LIMIT $1",
            self.table
        )
    }

    fn batch_entries_sql(&self) -> String {
        format!(
            "SELECT migration FROM {} WHERE batch = $1 ORDER BY id DESC",
            self.table
        )
    }

    fn record_sql(&self) -> String {
        format!(
            "INSERT INTO {} (migration, batch) VALUES ($1, $2)",
            self.table
        )
    }

    fn erase_sql(&self) -> String {
        format!("DELETE FROM {} WHERE migration = $1", self.table)
    }

    async fn apply_in_transaction(
        &self,
        migration: &str,
        statements: &[String],
        change: LedgerChange,
    ) -> MigrationResult<()> {
        let mut transaction: Transaction<'_, Postgres> = self
            .pool
            .begin()
            .await
            .map_err(|e| MigrationError::from_sqlx(e, "Failed to start transaction"))?;

        for statement in statements {
            tracing::debug!(migration, statement = %statement, "Executing statement");
            sqlx::query(statement)
                .execute(&mut *transaction)
                .await
                .map_err(|e| execution_error(migration, statement, e))?;
        }

        self.change_ledger(&mut *transaction, migration, change)
            .await?;

        transaction
            .commit()
            .await
            .map_err(|e| MigrationError::from_sqlx(e, "Failed to commit migration"))?;
        Ok(())
    }

    async fn apply_autocommit(
        &self,
        migration: &str,
        statements: &[String],
        change: LedgerChange,
    ) -> MigrationResult<()> {
        for statement in statements {
            tracing::debug!(migration, statement = %statement, "Executing statement");
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| execution_error(migration, statement, e))?;
        }

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| MigrationError::from_sqlx(e, "Failed to acquire connection"))?;
        self.change_ledger(&mut *conn, migration, change).await
    }

    async fn change_ledger(
        &self,
        conn: &mut sqlx::PgConnection,
        migration: &str,
        change: LedgerChange,
    ) -> MigrationResult<()> {
        match change {
            LedgerChange::Record { batch } => {
                sqlx::query(&self.record_sql())
                    .bind(migration)
                    .bind(batch)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| ledger_write_error(migration, e))?;
            }
            LedgerChange::Erase => {
                let result = sqlx::query(&self.erase_sql())
                    .bind(migration)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| MigrationError::from_sqlx(e, "Failed to remove migration record"))?;
                if result.rows_affected() == 0 {
                    return Err(MigrationError::NotFound(migration.to_string()));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn ensure_table(&self) -> MigrationResult<()> {
        sqlx::query(&self.create_table_sql())
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::from_sqlx(e, "Failed to create migrations table"))?;
        tracing::debug!(table = %self.table, "Migrations table checked");
        Ok(())
    }

    async fn entries(&self) -> MigrationResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&self.entries_sql())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrationError::from_sqlx(e, "Failed to query applied migrations"))?;

        rows.iter()
            .map(|row| {
                Ok(LedgerEntry {
                    id: row.try_get("id").map_err(read_error)?,
                    migration: row.try_get("migration").map_err(read_error)?,
                    batch: row.try_get("batch").map_err(read_error)?,
                    applied_at: row.try_get("created_at").map_err(read_error)?,
                })
            })
            .collect()
    }

    async fn apply(
        &self,
        migration: &str,
        statements: &[String],
        change: LedgerChange,
    ) -> MigrationResult<()> {
        if self.transactional {
            self.apply_in_transaction(migration, statements, change)
                .await
        } else {
            self.apply_autocommit(migration, statements, change).await
        }
    }

    async fn current_batch(&self) -> MigrationResult<i32> {
        let row = sqlx::query(&self.current_batch_sql())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrationError::from_sqlx(e, "Failed to get latest batch"))?;
        row.try_get("batch").map_err(read_error)
    }

    async fn most_recent(&self, count: usize) -> MigrationResult<Vec<String>> {
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        let rows = sqlx::query(&self.most_recent_sql())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrationError::from_sqlx(e, "Failed to query recent migrations"))?;
        rows.iter()
            .map(|row| row.try_get("migration").map_err(read_error))
            .collect()
    }

    async fn entries_for_batch(&self, batch: i32) -> MigrationResult<Vec<String>> {
        let rows = sqlx::query(&self.batch_entries_sql())
            .bind(batch)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrationError::from_sqlx(e, "Failed to query batch migrations"))?;
        rows.iter()
            .map(|row| row.try_get("migration").map_err(read_error))
            .collect()
    }
}

fn execution_error(migration: &str, statement: &str, err: sqlx::Error) -> MigrationError {
    match err {
        sqlx::Error::Database(db_err) => {
            MigrationError::execution(migration, statement, db_err.message())
        }
        other => match MigrationError::from_sqlx(other, "Statement failed") {
            MigrationError::Database(message) => {
                MigrationError::execution(migration, statement, message)
            }
            connection => connection,
        },
    }
}

fn ledger_write_error(migration: &str, err: sqlx::Error) -> MigrationError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return MigrationError::DuplicateMigration(migration.to_string());
        }
    }
    MigrationError::from_sqlx(err, "Failed to record migration")
}

fn read_error(err: sqlx::Error) -> MigrationError {
    MigrationError::Database(format!("Failed to read ledger row: {}", err))
}
