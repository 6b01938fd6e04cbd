//! Migration Runner - Executes migrations against the database
//!
//! Combines discovery, the registry and a ledger store into the `run`,
//! `rollback`, `reset` and `status` operations. Every operation is a plain
//! sequential loop; the first failure aborts it and leaves the ledger
//! reflecting only the migrations that completed before it.
//!
//! There is no cross-process locking: two concurrent `run`s against one
//! database race on the ledger's unique constraint.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::definitions::{
    MigrationConfig, MigrationStatus, MigrationStatusEntry, RollbackMode, RollbackReport,
    RunReport,
};
use crate::discovery::{discover, discover_lenient};
use crate::error::MigrationResult;
use crate::ledger::{LedgerChange, LedgerStore};
use crate::registry::MigrationRegistry;
use crate::script::{plan, Direction};

/// Migration runner that executes migrations through a ledger store
pub struct MigrationRunner {
    config: MigrationConfig,
    registry: MigrationRegistry,
    store: Arc<dyn LedgerStore>,
}

impl MigrationRunner {
    /// Create a new migration runner
    pub fn new(
        config: MigrationConfig,
        registry: MigrationRegistry,
        store: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Get the ledger store
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Apply every pending migration under a single new batch
    ///
    /// Files whose script cannot be resolved are skipped with a warning and
    /// later candidates are still attempted. A failing migration aborts the
    /// run; migrations recorded before it stay recorded.
    pub async fn run(&self) -> MigrationResult<RunReport> {
        self.store.ensure_table().await?;
        let applied = self.store.list_applied().await?;
        let candidates = discover(&self.config.migrations_dir, &self.config.extensions)?;
        self.warn_about_missing_files(&applied, &candidates);

        let batch = self.store.next_batch().await?;
        let mut report = RunReport {
            batch,
            applied: Vec::new(),
            skipped: Vec::new(),
        };

        for candidate in candidates
            .iter()
            .filter(|candidate| !applied.contains(&candidate.filename))
        {
            let filename = candidate.filename.as_str();
            let script = match self.registry.resolve(&self.config.migrations_dir, filename) {
                Ok(script) => script,
                Err(e) if e.is_unresolved() => {
                    tracing::warn!(migration = filename, "Skipping migration: {}", e);
                    report.skipped.push(filename.to_string());
                    continue;
                }
                Err(e) => return Err(e),
            };

            tracing::info!(migration = filename, batch, "Running migration");
            let statements = plan(script.as_ref(), filename, Direction::Up)?;
            if statements.is_empty() {
                tracing::warn!(
                    migration = filename,
                    "Migration has no up statements; recording it without schema changes"
                );
            }
            if let Err(e) = self
                .store
                .apply(filename, &statements, LedgerChange::Record { batch })
                .await
            {
                tracing::error!(migration = filename, "Failed to run migration: {}", e);
                return Err(e);
            }
            tracing::info!(migration = filename, batch, "Migrated");
            report.applied.push(filename.to_string());
        }

        if report.is_noop() {
            tracing::info!("Nothing to migrate");
        } else {
            tracing::info!(batch, count = report.applied.len(), "Migrations complete");
        }
        Ok(report)
    }

    /// Roll back the latest batch, or the most recent `n` migrations
    pub async fn rollback(&self, mode: RollbackMode) -> MigrationResult<RollbackReport> {
        self.store.ensure_table().await?;

        let selected = match mode {
            RollbackMode::Steps(steps) => self.store.most_recent(steps).await?,
            RollbackMode::Batch => {
                let batch = self.store.current_batch().await?;
                if batch == 0 {
                    Vec::new()
                } else {
                    tracing::info!(batch, "Rolling back batch");
                    self.store.entries_for_batch(batch).await?
                }
            }
        };

        if selected.is_empty() {
            tracing::info!("Nothing to rollback");
            return Ok(RollbackReport::default());
        }

        let report = self.revert(&selected).await?;
        tracing::info!(count = report.rolled_back.len(), "Rollback complete");
        Ok(report)
    }

    /// Roll back every applied migration, newest first
    pub async fn reset(&self) -> MigrationResult<RollbackReport> {
        self.store.ensure_table().await?;

        let selected = self.store.all_newest_first().await?;
        if selected.is_empty() {
            tracing::info!("Nothing to reset");
            return Ok(RollbackReport::default());
        }

        tracing::info!(count = selected.len(), "Resetting all migrations");
        let report = self.revert(&selected).await?;
        tracing::info!("All migrations have been reset");
        Ok(report)
    }

    /// Every known migration with its applied state
    ///
    /// Discovered files come first in filename order, followed by ledger
    /// rows whose files no longer exist.
    pub async fn status(&self) -> MigrationResult<Vec<MigrationStatusEntry>> {
        self.store.ensure_table().await?;
        let mut applied: BTreeMap<String, _> = self
            .store
            .entries()
            .await?
            .into_iter()
            .map(|entry| (entry.migration.clone(), entry))
            .collect();
        let discovered = discover_lenient(&self.config.migrations_dir, &self.config.extensions)?;

        let mut status = Vec::with_capacity(discovered.len());
        for migration in discovered {
            let state = match applied.remove(&migration.filename) {
                Some(entry) => MigrationStatus::Applied {
                    batch: entry.batch,
                    applied_at: entry.applied_at,
                },
                None => MigrationStatus::Pending,
            };
            status.push(MigrationStatusEntry {
                migration: migration.filename,
                status: state,
            });
        }

        let mut missing: Vec<_> = applied.into_values().collect();
        missing.sort_by_key(|entry| entry.id);
        status.extend(missing.into_iter().map(|entry| MigrationStatusEntry {
            migration: entry.migration,
            status: MigrationStatus::Missing {
                batch: entry.batch,
                applied_at: entry.applied_at,
            },
        }));

        Ok(status)
    }

    /// Run `down` for each selected migration in order, erasing its row
    async fn revert(&self, selected: &[String]) -> MigrationResult<RollbackReport> {
        let mut report = RollbackReport::default();

        for filename in selected {
            let script = self
                .registry
                .resolve(&self.config.migrations_dir, filename)
                .map_err(|e| {
                    tracing::error!(migration = %filename, "Cannot roll back: {}", e);
                    e
                })?;

            tracing::info!(migration = %filename, "Rolling back");
            let statements = plan(script.as_ref(), filename, Direction::Down)?;
            if let Err(e) = self
                .store
                .apply(filename, &statements, LedgerChange::Erase)
                .await
            {
                tracing::error!(migration = %filename, "Failed to rollback migration: {}", e);
                return Err(e);
            }
            tracing::info!(migration = %filename, "Rolled back");
            report.rolled_back.push(filename.clone());
        }

        Ok(report)
    }

    fn warn_about_missing_files(
        &self,
        applied: &BTreeSet<String>,
        candidates: &[crate::discovery::DiscoveredMigration],
    ) {
        let on_disk: BTreeSet<&str> = candidates.iter().map(|c| c.filename.as_str()).collect();
        for migration in applied.iter().filter(|m| !on_disk.contains(m.as_str())) {
            tracing::warn!(
                migration = %migration,
                "Applied migration has no file in the migrations directory"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;
    use crate::ledger::memory::MemoryLedger;
    use crate::schema::Schema;
    use crate::script::FnMigration;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const A: &str = "2025_01_01_000000_create_users.sql";
    const B: &str = "2025_01_02_000000_create_posts.sql";
    const C: &str = "2025_01_03_000000_create_tags.sql";

    fn write_sql(dir: &Path, filename: &str, table: &str) {
        fs::write(
            dir.join(filename),
            format!(
                "-- Up migration\nCREATE TABLE {table} (id INTEGER);\n\n-- Down migration\nDROP TABLE {table};\n"
            ),
        )
        .unwrap();
    }

    fn runner(dir: &Path, store: Arc<MemoryLedger>) -> MigrationRunner {
        MigrationRunner::new(
            MigrationConfig::with_dir(dir),
            MigrationRegistry::new(),
            store,
        )
    }

    fn rows(store: &MemoryLedger) -> Vec<(String, i32)> {
        store.rows()
    }

    fn row(name: &str, batch: i32) -> (String, i32) {
        (name.to_string(), batch)
    }

    #[tokio::test]
    async fn test_run_applies_pending_in_order() {
        let temp_dir = TempDir::new().unwrap();
        write_sql(temp_dir.path(), B, "posts");
        write_sql(temp_dir.path(), A, "users");
        let store = Arc::new(MemoryLedger::new());

        let report = runner(temp_dir.path(), store.clone()).run().await.unwrap();

        assert!(store.was_ensured());
        assert_eq!(report.batch, 1);
        assert_eq!(report.applied, vec![A, B]);
        assert_eq!(rows(&store), vec![row(A, 1), row(B, 1)]);
        assert_eq!(
            store.executed(),
            vec!["CREATE TABLE users (id INTEGER)", "CREATE TABLE posts (id INTEGER)"]
        );
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        write_sql(temp_dir.path(), A, "users");
        let store = Arc::new(MemoryLedger::new());
        let runner = runner(temp_dir.path(), store.clone());

        runner.run().await.unwrap();
        let second = runner.run().await.unwrap();

        assert!(second.is_noop());
        assert_eq!(rows(&store), vec![row(A, 1)]);
        assert_eq!(store.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_new_file_gets_next_batch() {
        let temp_dir = TempDir::new().unwrap();
        write_sql(temp_dir.path(), A, "users");
        write_sql(temp_dir.path(), B, "posts");
        write_sql(temp_dir.path(), C, "tags");
        let store = Arc::new(MemoryLedger::with_rows(&[(A, 1), (B, 1)]));

        let report = runner(temp_dir.path(), store.clone()).run().await.unwrap();

        assert_eq!(report.applied, vec![C]);
        assert_eq!(report.batch, 2);
        assert_eq!(rows(&store), vec![row(A, 1), row(B, 1), row(C, 2)]);
    }

    #[tokio::test]
    async fn test_batch_rollback_then_rerun_starts_at_batch_one() {
        let temp_dir = TempDir::new().unwrap();
        write_sql(temp_dir.path(), A, "users");
        write_sql(temp_dir.path(), B, "posts");
        let store = Arc::new(MemoryLedger::new());
        let runner = runner(temp_dir.path(), store.clone());

        runner.run().await.unwrap();
        let rolled = runner.rollback(RollbackMode::Batch).await.unwrap();
        assert_eq!(rolled.rolled_back, vec![B, A]);
        assert!(rows(&store).is_empty());

        write_sql(temp_dir.path(), C, "tags");
        let report = runner.run().await.unwrap();
        assert_eq!(report.batch, 1);
        assert_eq!(report.applied, vec![A, B, C]);
    }

    #[tokio::test]
    async fn test_batch_rollback_only_touches_latest_batch() {
        let temp_dir = TempDir::new().unwrap();
        for (name, table) in [(A, "users"), (B, "posts"), (C, "tags")] {
            write_sql(temp_dir.path(), name, table);
        }
        let store = Arc::new(MemoryLedger::with_rows(&[(A, 1), (B, 2), (C, 2)]));

        let report = runner(temp_dir.path(), store.clone())
            .rollback(RollbackMode::default())
            .await
            .unwrap();

        assert_eq!(report.rolled_back, vec![C, B]);
        assert_eq!(rows(&store), vec![row(A, 1)]);
        assert_eq!(
            store.executed(),
            vec!["DROP TABLE tags", "DROP TABLE posts"]
        );
    }

    #[tokio::test]
    async fn test_step_rollback_ignores_batches() {
        let temp_dir = TempDir::new().unwrap();
        for (name, table) in [(A, "users"), (B, "posts"), (C, "tags")] {
            write_sql(temp_dir.path(), name, table);
        }
        let store = Arc::new(MemoryLedger::with_rows(&[(A, 1), (B, 1), (C, 2)]));
        let runner = runner(temp_dir.path(), store.clone());

        let report = runner.rollback(RollbackMode::Steps(1)).await.unwrap();
        assert_eq!(report.rolled_back, vec![C]);
        assert_eq!(rows(&store), vec![row(A, 1), row(B, 1)]);

        // crosses into batch 1 and stops at the ledger size
        let report = runner.rollback(RollbackMode::Steps(5)).await.unwrap();
        assert_eq!(report.rolled_back, vec![B, A]);
        assert!(rows(&store).is_empty());
    }

    #[tokio::test]
    async fn test_rollback_on_empty_ledger_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryLedger::new());
        let runner = runner(temp_dir.path(), store.clone());

        assert!(runner.rollback(RollbackMode::Batch).await.unwrap().is_noop());
        assert!(runner.rollback(RollbackMode::Steps(3)).await.unwrap().is_noop());
        assert!(runner.reset().await.unwrap().is_noop());
        assert!(store.executed().is_empty());
    }

    #[tokio::test]
    async fn test_reset_spans_batches_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        for (name, table) in [(A, "users"), (B, "posts"), (C, "tags")] {
            write_sql(temp_dir.path(), name, table);
        }
        let store = Arc::new(MemoryLedger::with_rows(&[(A, 1), (B, 2), (C, 3)]));

        let report = runner(temp_dir.path(), store.clone()).reset().await.unwrap();

        assert_eq!(report.rolled_back, vec![C, B, A]);
        assert!(rows(&store).is_empty());
    }

    #[tokio::test]
    async fn test_failed_up_keeps_earlier_rows_and_stops() {
        let temp_dir = TempDir::new().unwrap();
        write_sql(temp_dir.path(), A, "users");
        write_sql(temp_dir.path(), B, "broken");
        write_sql(temp_dir.path(), C, "tags");
        let store = Arc::new(MemoryLedger::failing_on("broken"));

        let err = runner(temp_dir.path(), store.clone()).run().await.unwrap_err();

        match err {
            MigrationError::Execution { migration, statement, .. } => {
                assert_eq!(migration, B);
                assert!(statement.contains("broken"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(rows(&store), vec![row(A, 1)]);
        assert!(!store.executed().iter().any(|s| s.contains("tags")));
    }

    #[tokio::test]
    async fn test_failed_down_leaves_remaining_rows() {
        let temp_dir = TempDir::new().unwrap();
        write_sql(temp_dir.path(), A, "users");
        write_sql(temp_dir.path(), B, "broken");
        write_sql(temp_dir.path(), C, "tags");
        let store = Arc::new(MemoryLedger::failing_on("broken"));
        for name in [A, B, C] {
            store.record(name, 1).await.unwrap();
        }

        let err = runner(temp_dir.path(), store.clone()).reset().await.unwrap_err();

        assert!(matches!(err, MigrationError::Execution { .. }));
        assert_eq!(rows(&store), vec![row(A, 1), row(B, 1)]);
    }

    #[tokio::test]
    async fn test_run_skips_unresolved_scripts_and_continues() {
        let temp_dir = TempDir::new().unwrap();
        let orphan = "2025_01_02_000000_unregistered.rs";
        let coded = "2025_01_03_000000_add_phone.rs";
        write_sql(temp_dir.path(), A, "users");
        fs::write(temp_dir.path().join(orphan), "").unwrap();
        fs::write(temp_dir.path().join(coded), "").unwrap();

        let registry = MigrationRegistry::new().with(
            coded,
            FnMigration::new(
                |schema: &mut Schema| {
                    schema.add_column("users", "phone", "VARCHAR(20)");
                    Ok(())
                },
                |schema: &mut Schema| {
                    schema.drop_column("users", "phone");
                    Ok(())
                },
            ),
        );
        let store = Arc::new(MemoryLedger::new());
        let runner = MigrationRunner::new(
            MigrationConfig::with_dir(temp_dir.path()),
            registry,
            store.clone(),
        );

        let report = runner.run().await.unwrap();

        assert_eq!(report.applied, vec![A, coded]);
        assert_eq!(report.skipped, vec![orphan]);
        assert_eq!(rows(&store), vec![row(A, 1), row(coded, 1)]);
    }

    #[tokio::test]
    async fn test_run_skips_sql_file_without_up_marker() {
        let temp_dir = TempDir::new().unwrap();
        let unmarked = "2025_01_02_000000_unmarked.sql";
        write_sql(temp_dir.path(), A, "users");
        fs::write(temp_dir.path().join(unmarked), "CREATE TABLE posts (id INTEGER);\n").unwrap();
        let store = Arc::new(MemoryLedger::new());

        let report = runner(temp_dir.path(), store.clone()).run().await.unwrap();

        assert_eq!(report.applied, vec![A]);
        assert_eq!(report.skipped, vec![unmarked]);
        assert_eq!(rows(&store), vec![row(A, 1)]);
        assert_eq!(store.executed(), vec!["CREATE TABLE users (id INTEGER)"]);
    }

    #[tokio::test]
    async fn test_rollback_fails_when_file_is_missing() {
        let temp_dir = TempDir::new().unwrap();
        write_sql(temp_dir.path(), A, "users");
        let store = Arc::new(MemoryLedger::with_rows(&[(A, 1), (B, 1)]));

        let err = runner(temp_dir.path(), store.clone())
            .rollback(RollbackMode::Batch)
            .await
            .unwrap_err();

        assert!(err.is_unresolved());
        assert_eq!(rows(&store), vec![row(A, 1), row(B, 1)]);
    }

    #[tokio::test]
    async fn test_run_requires_migrations_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryLedger::new());

        let err = runner(&temp_dir.path().join("missing"), store.clone())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::DirectoryNotFound { .. }));
        assert!(rows(&store).is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_each_state() {
        let temp_dir = TempDir::new().unwrap();
        write_sql(temp_dir.path(), A, "users");
        write_sql(temp_dir.path(), C, "tags");
        let store = Arc::new(MemoryLedger::with_rows(&[(A, 1), (B, 1)]));

        let status = runner(temp_dir.path(), store).status().await.unwrap();

        let names: Vec<_> = status.iter().map(|s| s.migration.as_str()).collect();
        assert_eq!(names, vec![A, C, B]);
        assert!(matches!(status[0].status, MigrationStatus::Applied { batch: 1, .. }));
        assert_eq!(status[1].status, MigrationStatus::Pending);
        assert!(matches!(status[2].status, MigrationStatus::Missing { batch: 1, .. }));
    }

    #[tokio::test]
    async fn test_status_tolerates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryLedger::new());

        let status = runner(&temp_dir.path().join("missing"), store)
            .status()
            .await
            .unwrap();
        assert!(status.is_empty());
    }
}
