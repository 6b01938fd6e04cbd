//! Migration identity - canonical naming derived from filenames
//!
//! Filenames follow `{yyyy_mm_dd_HHMMSS}_{slug}.{ext}`. The timestamp prefix is
//! fixed-width, so ordering identities by timestamp string is chronological.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

static FILENAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}_\d{2}_\d{2}_\d{6})_(.+)\.([A-Za-z0-9]+)$")
        .expect("migration filename pattern is valid")
});

/// Timestamp format used in migration filenames (chrono syntax)
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H%M%S";

/// Identity of a migration, derived from its filename
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MigrationIdentity {
    /// Sortable timestamp prefix, empty for legacy names
    pub timestamp: String,
    /// Normalized human-readable name
    pub slug: String,
    /// The filename did not follow the timestamped convention
    pub legacy: bool,
}

impl MigrationIdentity {
    /// Derive the identity of a migration from its filename
    pub fn parse(filename: &str) -> Self {
        if let Some(captures) = FILENAME_PATTERN.captures(filename) {
            return Self {
                timestamp: captures[1].to_string(),
                slug: normalize_slug(&captures[2]),
                legacy: false,
            };
        }

        let stem = match filename.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => filename,
        };

        Self {
            timestamp: String::new(),
            slug: normalize_slug(stem),
            legacy: true,
        }
    }

    /// Registry key for this migration
    pub fn key(&self) -> String {
        if self.legacy {
            self.slug.clone()
        } else {
            format!("{}_{}", self.timestamp, self.slug)
        }
    }
}

impl Ord for MigrationIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.slug.cmp(&other.slug))
    }
}

impl PartialOrd for MigrationIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MigrationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Normalize a human-written migration name into a slug
///
/// Lowercases, turns `-` and whitespace into `_`, and collapses runs of `_`.
pub fn normalize_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        let ch = if ch == '-' || ch.is_whitespace() {
            '_'
        } else {
            ch.to_ascii_lowercase()
        };
        if ch == '_' && (slug.is_empty() || slug.ends_with('_')) {
            continue;
        }
        slug.push(ch);
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}
