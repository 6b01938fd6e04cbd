//! # tidemark-migrate: schema migration engine
//!
//! Tracks which migration scripts have been applied to a database, applies
//! pending ones in filename order under a shared batch number, and reverses
//! them by batch, by step count, or entirely.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidemark_migrate::{MigrationConfig, MigrationRegistry, MigrationRunner, PgLedger};
//!
//! # async fn example() -> tidemark_migrate::MigrationResult<()> {
//! let config = MigrationConfig::with_dir("migrations");
//! let store = PgLedger::connect_lazy("postgres://localhost/app", &config.migrations_table)?;
//! let runner = MigrationRunner::new(config, MigrationRegistry::new(), Arc::new(store));
//!
//! let report = runner.run().await?;
//! println!("applied {} migration(s) in batch {}", report.applied.len(), report.batch);
//! # Ok(())
//! # }
//! ```

pub mod definitions;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod postgres;
pub mod registry;
pub mod runner;
pub mod scaffold;
pub mod schema;
pub mod script;

pub use definitions::*;
pub use discovery::{discover, discover_lenient, DiscoveredMigration};
pub use error::{MigrationError, MigrationResult};
pub use identity::MigrationIdentity;
pub use ledger::{LedgerChange, LedgerEntry, LedgerStore, DEFAULT_LEDGER_TABLE};
pub use postgres::PgLedger;
pub use registry::MigrationRegistry;
pub use runner::MigrationRunner;
pub use scaffold::create_migration;
pub use schema::Schema;
pub use script::{Direction, FnMigration, Migration, SqlMigration};
