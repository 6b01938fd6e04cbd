//! Migration scaffolding - writes a new, empty migration file

use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{MigrationError, MigrationResult};
use crate::identity::{normalize_slug, TIMESTAMP_FORMAT};

/// Create `{yyyy_mm_dd_HHMMSS}_{slug}.sql` in `dir` and return its path
///
/// The directory must already exist and an existing file is never overwritten.
pub fn create_migration(dir: &Path, name: &str, now: DateTime<Utc>) -> MigrationResult<PathBuf> {
    let slug = normalize_slug(name);
    if slug.is_empty() {
        return Err(MigrationError::InvalidArgument(
            "migration name must not be empty".to_string(),
        ));
    }
    if !dir.is_dir() {
        return Err(MigrationError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
    let filename = format!("{}_{}.sql", timestamp, slug);
    let path = dir.join(&filename);

    let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
    file.write_all(migration_template(name, &filename, now).as_bytes())?;

    tracing::info!(migration = %filename, "Created migration");
    Ok(path)
}

fn migration_template(name: &str, filename: &str, now: DateTime<Utc>) -> String {
    format!(
        "-- Migration: {}\n\
         -- File: {}\n\
         -- Created: {}\n\n\
         -- Up migration\n\
         -- CREATE TABLE IF NOT EXISTS users (\n\
         --     id BIGSERIAL PRIMARY KEY,\n\
         --     email VARCHAR(255) UNIQUE NOT NULL\n\
         -- );\n\n\n\
         -- Down migration\n\
         -- DROP TABLE IF EXISTS users;\n\n",
        name.trim(),
        filename,
        now.format("%Y-%m-%d %H:%M:%S UTC")
    )
}
