//! Migration registry - maps migration identities to scripts
//!
//! Code-defined migrations are registered at startup under their identity key
//! (`2025_06_28_092041_create_users`). Plain `.sql` files need no registration;
//! they are loaded from disk when resolved.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{MigrationError, MigrationResult};
use crate::identity::MigrationIdentity;
use crate::script::{Migration, SqlMigration};

/// Registry of code-defined migrations
#[derive(Default, Clone)]
pub struct MigrationRegistry {
    scripts: BTreeMap<String, Arc<dyn Migration>>,
}

impl MigrationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a script under a migration key or filename
    ///
    /// A filename is reduced to its identity key, so
    /// `2025_06_28_092041_create_users.rs` and `2025_06_28_092041_create_users`
    /// register the same migration.
    pub fn register<M>(&mut self, key: &str, migration: M) -> &mut Self
    where
        M: Migration + 'static,
    {
        let key = canonical_key(key);
        if self.scripts.insert(key.clone(), Arc::new(migration)).is_some() {
            tracing::warn!(migration = %key, "Replacing previously registered migration");
        }
        self
    }

    /// Builder-style variant of [`register`](Self::register)
    pub fn with<M>(mut self, key: &str, migration: M) -> Self
    where
        M: Migration + 'static,
    {
        self.register(key, migration);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.scripts.contains_key(&canonical_key(key))
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Resolve the script for a migration file in `dir`
    ///
    /// The file must exist. A registered script wins; otherwise `.sql` files with
    /// an Up section are loaded from disk. Anything else is
    /// [`MigrationError::UnresolvedScript`].
    pub fn resolve(&self, dir: &Path, filename: &str) -> MigrationResult<Arc<dyn Migration>> {
        let path = dir.join(filename);
        if !path.is_file() {
            return Err(MigrationError::unresolved(
                filename,
                format!("migration file not found: {}", path.display()),
            ));
        }

        let identity = MigrationIdentity::parse(filename);
        if let Some(script) = self.scripts.get(&identity.key()) {
            return Ok(Arc::clone(script));
        }

        if path.extension().map_or(false, |ext| ext == "sql") {
            let script = SqlMigration::load(&path)?;
            if !script.has_up_section() {
                return Err(MigrationError::unresolved(
                    filename,
                    "no '-- Up migration' section marker in file",
                ));
            }
            return Ok(Arc::new(script));
        }

        Err(MigrationError::unresolved(
            filename,
            format!("no migration registered under '{}'", identity.key()),
        ))
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("scripts", &self.scripts.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn canonical_key(key: &str) -> String {
    let with_extension = if key.contains('.') {
        key.to_string()
    } else {
        format!("{}.rs", key)
    };
    MigrationIdentity::parse(&with_extension).key()
}
