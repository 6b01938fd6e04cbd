//! Schema toolkit - single DDL statements for migration scripts
//!
//! A [`Schema`] collects statements in the order a script issues them. The
//! ledger store executes them one at a time and reports the first one the
//! driver rejects, together with the driver's error text.
//!
//! Identifiers are double-quoted; column definitions are passed through
//! verbatim. Callers are trusted to supply well-formed names.

/// Ordered list of DDL statements produced by one `up` or `down` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    statements: Vec<String>,
}

impl Schema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table from an ordered list of `(column, definition)` pairs
    ///
    /// ```
    /// use tidemark_migrate::Schema;
    ///
    /// let mut schema = Schema::new();
    /// schema.create_table("users", [
    ///     ("id", "BIGSERIAL PRIMARY KEY"),
    ///     ("email", "VARCHAR(255) UNIQUE NOT NULL"),
    /// ]);
    /// assert_eq!(
    ///     schema.statements()[0],
    ///     r#"CREATE TABLE IF NOT EXISTS "users" ("id" BIGSERIAL PRIMARY KEY, "email" VARCHAR(255) UNIQUE NOT NULL)"#
    /// );
    /// ```
    pub fn create_table<I, C, D>(&mut self, table_name: &str, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = (C, D)>,
        C: AsRef<str>,
        D: AsRef<str>,
    {
        let definitions: Vec<String> = columns
            .into_iter()
            .map(|(name, definition)| {
                format!("{} {}", quote_ident(name.as_ref()), definition.as_ref().trim())
            })
            .collect();

        self.statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table_name),
            definitions.join(", ")
        ));
        self
    }

    /// Drop a table
    pub fn drop_table(&mut self, table_name: &str) -> &mut Self {
        self.statements
            .push(format!("DROP TABLE IF EXISTS {}", quote_ident(table_name)));
        self
    }

    /// Add a column to an existing table
    pub fn add_column(&mut self, table_name: &str, column_name: &str, definition: &str) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table_name),
            quote_ident(column_name),
            definition.trim()
        ));
        self
    }

    /// Drop a column from an existing table
    pub fn drop_column(&mut self, table_name: &str, column_name: &str) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table_name),
            quote_ident(column_name)
        ));
        self
    }

    /// Change the type of an existing column
    ///
    /// `new_definition` is the new column type, optionally followed by a
    /// `USING` clause.
    pub fn modify_column(
        &mut self,
        table_name: &str,
        column_name: &str,
        new_definition: &str,
    ) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
            quote_ident(table_name),
            quote_ident(column_name),
            new_definition.trim()
        ));
        self
    }

    /// Append a raw SQL statement
    pub fn raw(&mut self, sql: impl Into<String>) -> &mut Self {
        let sql = sql.into();
        let trimmed = sql.trim().trim_end_matches(';').trim_end();
        if !trimmed.is_empty() {
            self.statements.push(trimmed.to_string());
        }
        self
    }

    /// Statements collected so far
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Consume the schema, yielding its statements
    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }
}

/// Quote an identifier, doubling any embedded quote
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
