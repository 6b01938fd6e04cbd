//! # Logging
//!
//! Structured logging setup for the migration tool. Log records go to stderr
//! so command output on stdout stays machine readable.

use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Emit JSON records instead of plain text
    pub json_format: bool,
    /// Include the event target (module path)
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_target: false,
        }
    }
}

impl LoggingConfig {
    /// Quiet configuration used by the CLI unless told otherwise
    pub fn cli(level: &str) -> Self {
        Self {
            level: level.to_string(),
            ..Self::default()
        }
    }

    /// JSON records with targets, for log collectors
    pub fn json(level: &str) -> Self {
        Self {
            level: level.to_string(),
            json_format: true,
            include_target: true,
            ..Self::default()
        }
    }

    /// Filter directives: the level with sqlx statement logging turned down
    pub fn directives(&self) -> String {
        format!("{},sqlx=warn", self.level)
    }
}

/// Initialize logging; `RUST_LOG` wins over the configured directives
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.directives()))?;

    let layer = Layer::new()
        .with_writer(io::stderr)
        .with_target(config.include_target);

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.compact())
            .try_init()?;
    }

    tracing::debug!(
        target: "tidemark::logging",
        "Logging initialized (level: {}, format: {})",
        config.level,
        if config.json_format { "JSON" } else { "text" }
    );

    Ok(())
}
