use anyhow::{Result, bail};
use sea_query::{Alias, SimpleExpr, Value};

use crate::dialect::Dialect;
use crate::query::{QueryBuilder, Statement};
use crate::types::{DataType, datatype_to_value};

/// Builder for single-row INSERT statements.
pub struct InsertBuilder {
    table: String,
    values: Vec<(String, Value)>,
}

impl InsertBuilder {
    /// Creates a new INSERT builder for `table`.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
        }
    }

    /// Sets a column value for the insert.
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<DataType>) -> Self {
        self.values.push((column.into(), datatype_to_value(value.into())));
        self
    }

    /// Sets every `(column, value)` pair.
    #[must_use]
    pub fn set_all<N, V>(self, columns: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<DataType>,
    {
        columns.into_iter().fold(self, |builder, (column, value)| builder.set(column, value))
    }

    /// Build the INSERT statement.
    ///
    /// # Errors
    ///
    /// Returns an error if no columns were set or values cannot be converted.
    pub fn build(self, dialect: &dyn Dialect) -> Result<Statement> {
        if self.values.is_empty() {
            bail!("insert into '{}' has no columns", self.table);
        }

        let mut statement = sea_query::Query::insert();
        statement.into_table(Alias::new(self.table.as_str()));

        let columns: Vec<_> =
            self.values.iter().map(|(column, _)| Alias::new(column.as_str())).collect();
        let row: Vec<SimpleExpr> =
            self.values.into_iter().map(|(_, value)| SimpleExpr::Value(value)).collect();

        statement.columns(columns);
        statement.values_panic(row);

        let built = statement.build(QueryBuilder::for_dialect(dialect));
        Statement::from_built("insert", &self.table, built)
    }
}
