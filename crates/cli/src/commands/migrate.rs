use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tidemark_core::AppConfig;
use tidemark_migrate::{
    create_migration, MigrationConfig, MigrationError, MigrationRegistry, MigrationRunner,
    MigrationStatus, MigrationStatusEntry, PgLedger, RollbackMode, RollbackReport,
};

/// Scaffold a new migration file in the configured directory
pub fn make(config: &AppConfig, name: Option<&str>) -> Result<()> {
    let name = name.ok_or_else(|| {
        MigrationError::InvalidArgument(
            "missing migration name. Usage: tidemark migrate make <name>".to_string(),
        )
    })?;

    let path = create_migration(&config.migrations_path, name, Utc::now())?;
    println!("Created migration: {}", path.display());
    Ok(())
}

pub async fn run(config: &AppConfig) -> Result<()> {
    let runner = build_runner(config)?;
    let report = runner.run().await?;

    for skipped in &report.skipped {
        println!("Skipped: {}", skipped);
    }

    if report.is_noop() {
        println!("No new migrations to run.");
        return Ok(());
    }

    for migration in &report.applied {
        println!("Migrated: {}", migration);
    }
    println!("Migrations complete for batch {}.", report.batch);
    Ok(())
}

/// Roll back the last batch, or `step` migrations when given
///
/// The step value is checked before any database access.
pub async fn rollback(config: &AppConfig, step: Option<&str>) -> Result<()> {
    let mode = RollbackMode::from_step_arg(step)?;

    let runner = build_runner(config)?;
    let report = runner.rollback(mode).await?;
    print_rollback(&report, "No migrations to rollback.");
    Ok(())
}

pub async fn reset(config: &AppConfig) -> Result<()> {
    let runner = build_runner(config)?;
    let report = runner.reset().await?;
    print_rollback(&report, "Nothing to reset.");
    Ok(())
}

pub async fn status(config: &AppConfig, json: bool) -> Result<()> {
    let runner = build_runner(config)?;
    let entries = runner.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print!("{}", render_status(&entries));
    }
    Ok(())
}

fn print_rollback(report: &RollbackReport, noop_message: &str) {
    if report.is_noop() {
        println!("{}", noop_message);
        return;
    }
    for migration in &report.rolled_back {
        println!("Rolled back: {}", migration);
    }
}

/// Migrations shipped as Rust code are compiled into the binary that embeds
/// the engine; the stock CLI resolves `.sql` files only.
fn registry() -> MigrationRegistry {
    MigrationRegistry::new()
}

fn migration_config(config: &AppConfig) -> MigrationConfig {
    MigrationConfig {
        migrations_dir: config.migrations_path.clone(),
        migrations_table: config.migrations_table.clone(),
        transactional: config.transactional,
        ..MigrationConfig::default()
    }
}

fn build_runner(config: &AppConfig) -> Result<MigrationRunner> {
    config.validate().context("Invalid database configuration")?;
    let url = config.database.connection_url()?;
    tracing::debug!(database = %config.database.masked_url(), "Using database");

    let store = PgLedger::connect_lazy(&url, &config.migrations_table)?
        .with_transactions(config.transactional);

    Ok(MigrationRunner::new(
        migration_config(config),
        registry(),
        Arc::new(store),
    ))
}

fn render_status(entries: &[MigrationStatusEntry]) -> String {
    if entries.is_empty() {
        return "No migrations found.\n".to_string();
    }

    let width = entries
        .iter()
        .map(|entry| entry.migration.len())
        .max()
        .unwrap_or(0)
        .max("Migration".len());

    let mut out = format!(
        "{:<8}  {:<width$}  {:>5}  {}\n",
        "Status",
        "Migration",
        "Batch",
        "Applied at",
        width = width
    );

    for entry in entries {
        let (state, batch, applied_at) = match &entry.status {
            MigrationStatus::Pending => ("Pending", String::new(), String::new()),
            MigrationStatus::Applied { batch, applied_at } => (
                "Applied",
                batch.to_string(),
                applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ),
            MigrationStatus::Missing { batch, applied_at } => (
                "Missing",
                batch.to_string(),
                applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ),
        };
        let line = format!(
            "{:<8}  {:<width$}  {:>5}  {}",
            state,
            entry.migration,
            batch,
            applied_at,
            width = width
        );
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}
