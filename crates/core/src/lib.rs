//! # tidemark-core
//!
//! Configuration loading and logging setup shared by the tidemark crates.

pub mod config;
pub mod logging;

pub use config::{AppConfig, ConfigError, ConfigSource, DatabaseConfig};
pub use logging::{init_logging, LoggingConfig};
