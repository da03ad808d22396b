use anyhow::{Result, bail};
use sea_query::{Alias, SimpleExpr};

use crate::dialect::Dialect;
use crate::filter::Filter;
use crate::query::{QueryBuilder, Statement};

/// Builder for DELETE statements.
///
/// A delete without any filter is refused rather than emptying the table.
pub struct DeleteBuilder {
    table: String,
    filters: Vec<SimpleExpr>,
}

impl DeleteBuilder {
    /// Creates a new DELETE builder for `table`.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
        }
    }

    /// Adds a WHERE clause filter.
    #[must_use]
    pub fn r#where(mut self, filter: Filter) -> Self {
        self.filters.push(filter.into_expr());
        self
    }

    /// Build the DELETE statement.
    ///
    /// # Errors
    ///
    /// Returns an error if no filter was supplied or values cannot be converted.
    pub fn build(self, dialect: &dyn Dialect) -> Result<Statement> {
        if self.filters.is_empty() {
            bail!("delete from '{}' has no filter", self.table);
        }

        let mut statement = sea_query::Query::delete();
        statement.from_table(Alias::new(self.table.as_str()));

        for filter in self.filters {
            statement.and_where(filter);
        }

        let built = statement.build(QueryBuilder::for_dialect(dialect));
        Statement::from_built("delete", &self.table, built)
    }
}
