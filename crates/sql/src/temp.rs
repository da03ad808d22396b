//! # Temporary tables
//!
//! Temporary tables are provisioned before a query runs so the query text can
//! join against caller-supplied rows, and dropped once the reader is done.

use anyhow::{Context, Result};

use crate::connection::Connection;
use crate::insert::InsertBuilder;
use crate::query::Statement;
use crate::types::DataType;

/// Declaration of a temporary table and its seed rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TempTable {
    /// Table name as referenced by the query text.
    pub name: String,

    /// Column definition text, e.g. `id INTEGER NOT NULL, tag TEXT`.
    pub columns: String,

    /// Index column lists, one index per entry.
    pub indexes: Vec<Vec<String>>,

    /// Seed rows as ordered `(column, value)` records.
    pub rows: Vec<Vec<(String, DataType)>>,
}

impl TempTable {
    /// Declares a temporary table.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: columns.into(),
            ..Self::default()
        }
    }

    /// Adds an index over `columns`.
    #[must_use]
    pub fn index<N: Into<String>>(mut self, columns: impl IntoIterator<Item = N>) -> Self {
        self.indexes.push(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a seed row.
    #[must_use]
    pub fn row<N, V>(mut self, values: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<DataType>,
    {
        self.rows.push(values.into_iter().map(|(n, v)| (n.into(), v.into())).collect());
        self
    }

    /// Statements creating the table, its indexes and its seed rows.
    ///
    /// # Errors
    ///
    /// Returns an error if a seed row cannot be turned into an insert.
    pub fn create_statements(&self, conn: &dyn Connection) -> Result<Vec<Statement>> {
        let dialect = conn.dialect();
        let mut statements = vec![Statement {
            sql: dialect.create_temp_table(&self.name, &self.columns),
            params: Vec::new(),
        }];

        for (ordinal, columns) in self.indexes.iter().enumerate() {
            statements.push(Statement {
                sql: dialect.create_temp_index(&self.name, ordinal, columns),
                params: Vec::new(),
            });
        }

        for row in &self.rows {
            let insert = InsertBuilder::new(&self.name).set_all(row.iter().cloned());
            statements.push(insert.build(dialect)?);
        }

        Ok(statements)
    }

    fn create(&self, conn: &mut dyn Connection) -> Result<()> {
        for statement in self.create_statements(conn)? {
            conn.exec(&statement.sql, &statement.params)
                .with_context(|| format!("provisioning temporary table '{}'", self.name))?;
        }
        Ok(())
    }

    fn drop_from(&self, conn: &mut dyn Connection) -> Result<()> {
        let sql = conn.dialect().drop_temp_table(&self.name);
        conn.exec(&sql, &[])
            .with_context(|| format!("dropping temporary table '{}'", self.name))?;
        Ok(())
    }
}

/// Provisions `tables`, runs `f`, then drops every table that was created.
///
/// Tables are dropped on every exit path. When both `f` and a drop fail, the
/// error from `f` is returned.
///
/// # Errors
///
/// Returns the first provisioning error, the error from `f`, or a drop error.
pub fn with_temp_tables<T, E>(
    conn: &mut dyn Connection, tables: &[TempTable],
    f: impl FnOnce(&mut dyn Connection) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<anyhow::Error>,
{
    let mut created = 0;
    let mut outcome = Ok(());
    for table in tables {
        if let Err(err) = table.create(conn) {
            outcome = Err(err);
            // a partially created table is still dropped
            created += 1;
            break;
        }
        created += 1;
    }

    let result = match outcome {
        Ok(()) => f(conn),
        Err(err) => Err(E::from(err)),
    };

    let mut dropped = Ok(());
    for table in tables[..created].iter().rev() {
        if let Err(err) = table.drop_from(conn) {
            tracing::warn!(table = %table.name, error = %err, "failed to drop temporary table");
            if dropped.is_ok() {
                dropped = Err(err);
            }
        }
    }

    match (result, dropped) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(E::from(err)),
        (Err(err), _) => Err(err),
    }
}
