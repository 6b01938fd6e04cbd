//! Migration discovery - enumerate migration files on disk
//!
//! Scans a single directory (non-recursively) and returns candidates in
//! ascending filename order, which is the order they are applied in.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MigrationError, MigrationResult};
use crate::identity::MigrationIdentity;

/// A migration file found in the migrations directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredMigration {
    /// Raw filename, also the ledger identifier
    pub filename: String,
    /// Full path to the file
    pub path: PathBuf,
    /// Identity parsed from the filename
    pub identity: MigrationIdentity,
}

/// Discover migrations in `dir` with one of the given extensions
///
/// Fails with [`MigrationError::DirectoryNotFound`] when `dir` is missing.
pub fn discover(dir: &Path, extensions: &[String]) -> MigrationResult<Vec<DiscoveredMigration>> {
    if !dir.is_dir() {
        return Err(MigrationError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut migrations = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let filename = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                tracing::warn!(file = ?raw, "Skipping migration file with non UTF-8 name");
                continue;
            }
        };
        if filename.starts_with('.') || !has_extension(&filename, extensions) {
            continue;
        }

        let identity = MigrationIdentity::parse(&filename);
        if identity.legacy {
            tracing::warn!(
                migration = %filename,
                "Migration filename does not follow yyyy_mm_dd_HHMMSS_name; ordering may be unreliable"
            );
        }

        migrations.push(DiscoveredMigration {
            path: entry.path(),
            filename,
            identity,
        });
    }

    migrations.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(migrations)
}

/// Like [`discover`], but a missing directory is a warning and yields nothing
///
/// Used by listing-only operations.
pub fn discover_lenient(
    dir: &Path,
    extensions: &[String],
) -> MigrationResult<Vec<DiscoveredMigration>> {
    match discover(dir, extensions) {
        Err(MigrationError::DirectoryNotFound { path }) => {
            tracing::warn!(path = %path.display(), "Migrations directory not found");
            Ok(Vec::new())
        }
        other => other,
    }
}

fn has_extension(filename: &str, extensions: &[String]) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| extensions.iter().any(|allowed| allowed == ext))
}
