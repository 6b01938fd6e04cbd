//! Migration scripts - the `up`/`down` pair behind each migration file
//!
//! Scripts do not talk to the database themselves. They describe their change
//! on a [`Schema`] and the runner hands the result to the ledger store, which
//! executes it together with the ledger update.

use std::fs;
use std::path::Path;

use crate::error::{MigrationError, MigrationResult};
use crate::schema::Schema;

/// A single versioned unit of schema change
pub trait Migration: Send + Sync {
    /// Apply the change
    fn up(&self, schema: &mut Schema) -> MigrationResult<()>;

    /// Reverse the change
    fn down(&self, schema: &mut Schema) -> MigrationResult<()>;
}

/// Migration loaded from a `.sql` file with `-- Up migration` / `-- Down migration` sections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    up_statements: Vec<String>,
    down_statements: Vec<String>,
    has_up_section: bool,
}

impl SqlMigration {
    /// Parse migration file content
    ///
    /// Statement text is kept verbatim; only the separating `;` is dropped.
    pub fn parse(content: &str) -> Self {
        let sections = split_sections(content);
        Self {
            up_statements: split_sql_statements(&sections.up),
            down_statements: split_sql_statements(&sections.down),
            has_up_section: sections.has_up,
        }
    }

    /// Load and parse a migration file
    pub fn load(path: &Path) -> MigrationResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn up_statements(&self) -> &[String] {
        &self.up_statements
    }

    pub fn down_statements(&self) -> &[String] {
        &self.down_statements
    }

    /// Whether the file contains an `-- Up migration` marker
    pub fn has_up_section(&self) -> bool {
        self.has_up_section
    }
}

impl Migration for SqlMigration {
    fn up(&self, schema: &mut Schema) -> MigrationResult<()> {
        for statement in &self.up_statements {
            schema.raw(statement.as_str());
        }
        Ok(())
    }

    fn down(&self, schema: &mut Schema) -> MigrationResult<()> {
        for statement in &self.down_statements {
            schema.raw(statement.as_str());
        }
        Ok(())
    }
}

type SchemaFn = Box<dyn Fn(&mut Schema) -> MigrationResult<()> + Send + Sync>;

/// Migration defined in code by a pair of closures
pub struct FnMigration {
    up: SchemaFn,
    down: SchemaFn,
}

impl FnMigration {
    pub fn new<U, D>(up: U, down: D) -> Self
    where
        U: Fn(&mut Schema) -> MigrationResult<()> + Send + Sync + 'static,
        D: Fn(&mut Schema) -> MigrationResult<()> + Send + Sync + 'static,
    {
        Self {
            up: Box::new(up),
            down: Box::new(down),
        }
    }
}

impl Migration for FnMigration {
    fn up(&self, schema: &mut Schema) -> MigrationResult<()> {
        (self.up)(schema)
    }

    fn down(&self, schema: &mut Schema) -> MigrationResult<()> {
        (self.down)(schema)
    }
}

impl std::fmt::Debug for FnMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMigration").finish_non_exhaustive()
    }
}

/// Run a script in one direction and collect the statements it issues
pub fn plan(
    migration: &dyn Migration,
    filename: &str,
    direction: Direction,
) -> MigrationResult<Vec<String>> {
    let mut schema = Schema::new();
    let outcome = match direction {
        Direction::Up => migration.up(&mut schema),
        Direction::Down => migration.down(&mut schema),
    };
    outcome.map_err(|e| match e {
        MigrationError::Execution { .. } => e,
        other => MigrationError::execution(filename, direction.as_str(), other.to_string()),
    })?;
    Ok(schema.into_statements())
}

/// Direction a migration is executed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Apply the migration
    Up,
    /// Reverse the migration
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

#[derive(Default)]
struct Sections {
    up: String,
    down: String,
    has_up: bool,
}

/// Split file content at the `-- Up` / `-- Down` marker lines
///
/// Lines before the first marker are ignored. Every other line, comments and
/// blank lines included, is kept as written.
fn split_sections(content: &str) -> Sections {
    let mut sections = Sections::default();
    let mut current = None;

    for line in content.lines() {
        if let Some(direction) = section_marker(line) {
            sections.has_up |= direction == Direction::Up;
            current = Some(direction);
            continue;
        }

        let target = match current {
            Some(Direction::Up) => &mut sections.up,
            Some(Direction::Down) => &mut sections.down,
            None => continue,
        };
        target.push_str(line);
        target.push('\n');
    }

    sections
}

fn section_marker(line: &str) -> Option<Direction> {
    let trimmed = line.trim();
    if !trimmed.starts_with("--") {
        return None;
    }

    let marker = trimmed.trim_start_matches('-').trim().to_lowercase();
    if marker == "up" || marker.starts_with("up migration") {
        Some(Direction::Up)
    } else if marker == "down" || marker.starts_with("down migration") {
        Some(Direction::Down)
    } else {
        None
    }
}

/// Split a SQL section into individual statements at top-level `;`
///
/// Quoted strings (`'..'`, `E'..'`), quoted identifiers, dollar-quoted bodies
/// (`$$..$$`, `$tag$..$tag$`) and comments are opaque, so function bodies and
/// `DO` blocks stay whole. Statements are returned verbatim apart from
/// surrounding whitespace; pieces holding only comments are dropped.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_line_comment(bytes, i);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i);
            }
            b'\'' => {
                let escapes = i > 0
                    && matches!(bytes[i - 1], b'E' | b'e')
                    && !(i > 1 && is_ident_byte(bytes[i - 2]));
                i = skip_quoted(bytes, i, b'\'', escapes);
                has_code = true;
            }
            b'"' => {
                i = skip_quoted(bytes, i, b'"', false);
                has_code = true;
            }
            b'$' if !(i > 0 && is_ident_byte(bytes[i - 1])) => {
                i = match dollar_delimiter_end(bytes, i) {
                    Some(open_end) => skip_dollar_quoted(bytes, i, open_end),
                    None => i + 1,
                };
                has_code = true;
            }
            b';' => {
                if has_code {
                    statements.push(sql[start..i].trim().to_string());
                }
                start = i + 1;
                has_code = false;
                i += 1;
            }
            byte => {
                if !byte.is_ascii_whitespace() {
                    has_code = true;
                }
                i += 1;
            }
        }
    }

    if has_code {
        statements.push(sql[start..].trim().to_string());
    }
    statements
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte >= 0x80
}

/// Index of the newline ending a `--` comment
fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |offset| start + offset)
}

/// Index just past a (possibly nested) `/* */` comment
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Index just past a quoted run; a doubled quote is an escaped quote
fn skip_quoted(bytes: &[u8], start: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if backslash_escapes && bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// End of a `$tag$` opening delimiter at `start`, if there is one
///
/// Tags follow identifier rules, so positional parameters like `$1` are not
/// delimiters.
fn dollar_delimiter_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if let Some(&first) = bytes.get(i) {
        if first.is_ascii_digit() {
            return None;
        }
    }
    while i < bytes.len() && is_ident_byte(bytes[i]) {
        i += 1;
    }
    (bytes.get(i) == Some(&b'$')).then_some(i + 1)
}

/// Index just past the closing delimiter matching `bytes[start..open_end]`
fn skip_dollar_quoted(bytes: &[u8], start: usize, open_end: usize) -> usize {
    let delimiter = &bytes[start..open_end];
    bytes[open_end..]
        .windows(delimiter.len())
        .position(|window| window == delimiter)
        .map_or(bytes.len(), |offset| open_end + offset + delimiter.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT: &str = "-- Migration: create_users\n\
        -- Up migration\n\
        CREATE TABLE users (id INTEGER PRIMARY KEY, email VARCHAR(255));\n\
        CREATE INDEX idx_users_email ON users (email);\n\
        \n\
        -- Down migration\n\
        DROP TABLE users;\n";

    #[test]
    fn test_sections_are_split() {
        let migration = SqlMigration::parse(CONTENT);
        assert_eq!(migration.up_statements().len(), 2);
        assert!(migration.up_statements()[0].starts_with("CREATE TABLE users"));
        assert!(migration.up_statements()[1].contains("idx_users_email"));
        assert_eq!(migration.down_statements(), ["DROP TABLE users"]);
    }

    #[test]
    fn test_split_keeps_statement_text() {
        let statements = split_sql_statements("FROBNICATE  everything;\n  frobnicate again");
        assert_eq!(statements, vec!["FROBNICATE  everything", "frobnicate again"]);
    }

    #[test]
    fn test_split_keeps_function_bodies_whole() {
        let function = "CREATE FUNCTION touch_updated_at() RETURNS trigger AS $$\n\
            BEGIN\n    NEW.updated_at = now();\n    RETURN NEW;\nEND;\n$$ LANGUAGE plpgsql";
        let trigger = "CREATE TRIGGER users_touch BEFORE UPDATE ON users \
            FOR EACH ROW EXECUTE FUNCTION touch_updated_at()";
        let sql = format!("{};\n{};\n", function, trigger);

        assert_eq!(split_sql_statements(&sql), vec![function, trigger]);
    }

    #[test]
    fn test_split_keeps_tagged_do_blocks_whole() {
        let block = "DO $body$ BEGIN\n\
            IF NOT EXISTS (SELECT 1 FROM pg_type WHERE typname = 'mood') THEN\n\
            CREATE TYPE mood AS ENUM ('sad', 'ok');\n\
            END IF;\nEND $body$";
        let sql = format!("{};\nSELECT $1::int;", block);

        assert_eq!(split_sql_statements(&sql), vec![block, "SELECT $1::int"]);
    }

    #[test]
    fn test_split_ignores_semicolons_in_quotes_and_comments() {
        let sql = "INSERT INTO notes (body) VALUES ('a;b', E'it\\'s;', 'x'';y');\n\
            -- trailing; comment\n\
            /* block; /* nested; */ still; */\n\
            ALTER TABLE \"odd;name\" ADD COLUMN c INT;\n\
            -- only a comment;";

        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0],
            "INSERT INTO notes (body) VALUES ('a;b', E'it\\'s;', 'x'';y')"
        );
        assert!(statements[1].starts_with("-- trailing; comment"));
        assert!(statements[1].ends_with("ALTER TABLE \"odd;name\" ADD COLUMN c INT"));
    }

    #[test]
    fn test_sql_file_keeps_blank_and_comment_lines_in_bodies() {
        let content = "-- Up migration\n\
            CREATE FUNCTION f() RETURNS int AS $$\n\
            -- inner comment\n\
            \n\
            SELECT 1;\n\
            $$ LANGUAGE sql;\n\
            -- Down migration\n\
            DROP FUNCTION f();\n";

        let migration = SqlMigration::parse(content);
        assert!(migration.has_up_section());
        assert_eq!(
            migration.up_statements(),
            ["CREATE FUNCTION f() RETURNS int AS $$\n-- inner comment\n\nSELECT 1;\n$$ LANGUAGE sql"]
        );
        assert_eq!(migration.down_statements(), ["DROP FUNCTION f()"]);
    }

    #[test]
    fn test_file_without_markers() {
        let migration = SqlMigration::parse("CREATE TABLE users (id INTEGER);\n");
        assert!(!migration.has_up_section());
        assert!(migration.up_statements().is_empty());
    }

    #[test]
    fn test_empty_sections() {
        let migration = SqlMigration::parse("-- Up migration\n\n-- Down migration\n");
        assert!(migration.up_statements().is_empty());
        assert!(migration.down_statements().is_empty());
    }

    #[test]
    fn test_plan_collects_statements() {
        let migration = FnMigration::new(
            |schema| {
                schema.create_table("posts", [("id", "BIGSERIAL PRIMARY KEY")]);
                Ok(())
            },
            |schema| {
                schema.drop_table("posts");
                Ok(())
            },
        );

        let up = plan(&migration, "2024_01_01_000000_posts.rs", Direction::Up).unwrap();
        assert_eq!(up.len(), 1);
        assert!(up[0].contains("CREATE TABLE IF NOT EXISTS \"posts\""));

        let down = plan(&migration, "2024_01_01_000000_posts.rs", Direction::Down).unwrap();
        assert_eq!(down, vec![r#"DROP TABLE IF EXISTS "posts""#]);
    }

    #[test]
    fn test_plan_wraps_script_errors() {
        let migration = FnMigration::new(
            |_| Err(MigrationError::InvalidArgument("bad column".to_string())),
            |_| Ok(()),
        );

        let err = plan(&migration, "2024_01_01_000000_bad.rs", Direction::Up).unwrap_err();
        match err {
            MigrationError::Execution { migration, statement, message } => {
                assert_eq!(migration, "2024_01_01_000000_bad.rs");
                assert_eq!(statement, "up");
                assert!(message.contains("bad column"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
