//! # Dialect strategies
//!
//! Per-dialect SQL glue: primary-key discovery, generated identifier
//! retrieval, temporary-table DDL and placeholder style. A strategy is
//! selected once per connection.

use std::fmt::Debug;
use std::str::FromStr;

use anyhow::bail;

use crate::types::DataType;

/// Dialect capability set used by the accessor and the statement builders.
pub trait Dialect: Debug + Send + Sync {
    /// The dialect's identity.
    fn kind(&self) -> DialectKind;

    /// Identifier quote character.
    fn quote(&self) -> u8 {
        b'"'
    }

    /// Placeholder prefix and whether placeholders are numbered (`$1`) or
    /// anonymous (`?`).
    fn placeholder(&self) -> (&'static str, bool) {
        ("$", true)
    }

    /// Query returning the primary-key column names of `table`, one per
    /// record, in key order. The first column of each record is read.
    fn primary_keys_query(&self, table: &str) -> (String, Vec<DataType>);

    /// Query returning the identifier generated by the last auto-id insert
    /// on the current connection.
    fn last_insert_id_query(&self) -> &'static str;

    /// DDL creating a temporary table.
    fn create_temp_table(&self, name: &str, columns: &str) -> String {
        format!("CREATE TEMPORARY TABLE {name} ({columns})")
    }

    /// DDL creating the `ordinal`-th index of a temporary table.
    fn create_temp_index(&self, table: &str, ordinal: usize, columns: &[String]) -> String {
        format!("CREATE INDEX ix_{table}_{ordinal} ON {table} ({})", columns.join(", "))
    }

    /// DDL dropping a temporary table.
    fn drop_temp_table(&self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS {name}")
    }

    /// Renders the `position`-th (1-based) positional parameter.
    fn render_placeholder(&self, position: usize) -> String {
        let (prefix, numbered) = self.placeholder();
        if numbered { format!("{prefix}{position}") } else { prefix.to_string() }
    }
}

/// Supported dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectKind {
    /// `SQLite` 3.16 or later.
    Sqlite,
    /// `PostgreSQL`.
    Postgres,
    /// `MySQL` / `MariaDB`.
    MySql,
}

impl DialectKind {
    /// Returns the strategy for this dialect.
    #[must_use]
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            Self::Sqlite => &Sqlite,
            Self::Postgres => &Postgres,
            Self::MySql => &MySql,
        }
    }
}

impl FromStr for DialectKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            other => bail!("unsupported SQL dialect: {other}"),
        }
    }
}

/// `SQLite` strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn primary_keys_query(&self, table: &str) -> (String, Vec<DataType>) {
        (
            "SELECT name FROM pragma_table_info($1) WHERE pk > 0 ORDER BY pk".to_string(),
            vec![table.into()],
        )
    }

    fn last_insert_id_query(&self) -> &'static str {
        "SELECT last_insert_rowid()"
    }

    fn create_temp_table(&self, name: &str, columns: &str) -> String {
        format!("CREATE TEMP TABLE {name} ({columns})")
    }
}

/// `PostgreSQL` strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn primary_keys_query(&self, table: &str) -> (String, Vec<DataType>) {
        (
            "SELECT a.attname FROM pg_index i \
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
             WHERE i.indrelid = $1::regclass AND i.indisprimary \
             ORDER BY array_position(i.indkey, a.attnum)"
                .to_string(),
            vec![table.into()],
        )
    }

    fn last_insert_id_query(&self) -> &'static str {
        "SELECT lastval()"
    }
}

/// `MySQL` strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn quote(&self) -> u8 {
        b'`'
    }

    fn placeholder(&self) -> (&'static str, bool) {
        ("?", false)
    }

    fn primary_keys_query(&self, table: &str) -> (String, Vec<DataType>) {
        (
            "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
             ORDER BY ORDINAL_POSITION"
                .to_string(),
            vec![table.into()],
        )
    }

    fn last_insert_id_query(&self) -> &'static str {
        "SELECT LAST_INSERT_ID()"
    }

    fn drop_temp_table(&self, name: &str) -> String {
        format!("DROP TEMPORARY TABLE IF EXISTS {name}")
    }
}
