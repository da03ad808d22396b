use anyhow::{Result, bail};
use sea_query::{Alias, SimpleExpr, Value};

use crate::dialect::Dialect;
use crate::filter::Filter;
use crate::query::{QueryBuilder, Statement};
use crate::types::{DataType, datatype_to_value};

/// Builder for UPDATE statements.
pub struct UpdateBuilder {
    table: String,
    set_clauses: Vec<(String, Value)>,
    filters: Vec<SimpleExpr>,
}

impl UpdateBuilder {
    /// Creates a new UPDATE builder for `table`.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set_clauses: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Sets a column to a new value.
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<DataType>) -> Self {
        self.set_clauses.push((column.into(), datatype_to_value(value.into())));
        self
    }

    /// Adds a WHERE clause filter.
    #[must_use]
    pub fn r#where(mut self, filter: Filter) -> Self {
        self.filters.push(filter.into_expr());
        self
    }

    /// Build the UPDATE statement.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is set or values cannot be converted.
    pub fn build(self, dialect: &dyn Dialect) -> Result<Statement> {
        if self.set_clauses.is_empty() {
            bail!("update of '{}' sets no columns", self.table);
        }

        let mut statement = sea_query::Query::update();
        statement.table(Alias::new(self.table.as_str()));

        for (column, value) in self.set_clauses {
            statement.value(Alias::new(column.as_str()), value);
        }

        for expr in self.filters {
            statement.and_where(expr);
        }

        let built = statement.build(QueryBuilder::for_dialect(dialect));
        Statement::from_built("update", &self.table, built)
    }
}
