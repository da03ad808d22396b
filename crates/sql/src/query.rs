//! ``SeaQuery`` rendering for the single-table statement builders.

use anyhow::Result;
use sea_query::backend::{
    EscapeBuilder, OperLeftAssocDecider, PrecedenceDecider, QuotedBuilder, TableRefBuilder,
};
use sea_query::prepare::SqlWriter;
use sea_query::{BinOper, Oper, Quote, SimpleExpr, SubQueryStatement, Value, Values};

use crate::dialect::Dialect;
use crate::types::{DataType, values_to_datatypes};

/// A generated SQL statement and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with dialect placeholders.
    pub sql: String,

    /// Parameters in placeholder order.
    pub params: Vec<DataType>,
}

impl Statement {
    // Converts ``SeaQuery`` output for `table` and logs the result.
    pub(crate) fn from_built(
        kind: &'static str, table: &str, (sql, values): (String, Values),
    ) -> Result<Self> {
        let params = values_to_datatypes(values)?;
        tracing::debug!(kind, table, sql = %sql, param_count = params.len(), "generated statement");
        Ok(Self { sql, params })
    }
}

/// ``SeaQuery`` backend taking its quoting and placeholder style from a
/// [`Dialect`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueryBuilder {
    quote: Quote,
    prefix: &'static str,
    numbered: bool,
}

impl QueryBuilder {
    pub(crate) fn for_dialect(dialect: &dyn Dialect) -> Self {
        let (prefix, numbered) = dialect.placeholder();
        Self {
            quote: Quote::new(dialect.quote()),
            prefix,
            numbered,
        }
    }
}

impl QuotedBuilder for QueryBuilder {
    fn quote(&self) -> Quote {
        self.quote
    }
}

impl EscapeBuilder for QueryBuilder {}

impl TableRefBuilder for QueryBuilder {}

impl OperLeftAssocDecider for QueryBuilder {
    fn well_known_left_associative(&self, op: &BinOper) -> bool {
        // same set as sea-query's built-in backends
        matches!(
            op,
            BinOper::And | BinOper::Or | BinOper::Add | BinOper::Sub | BinOper::Mul | BinOper::Mod
        )
    }
}

impl PrecedenceDecider for QueryBuilder {
    fn inner_expr_well_known_greater_precedence(
        &self, _inner: &SimpleExpr, _outer_oper: &Oper,
    ) -> bool {
        false
    }
}

impl sea_query::backend::QueryBuilder for QueryBuilder {
    fn prepare_query_statement(&self, query: &SubQueryStatement, sql: &mut dyn SqlWriter) {
        match query {
            SubQueryStatement::SelectStatement(s) => self.prepare_select_statement(s, sql),
            SubQueryStatement::InsertStatement(s) => self.prepare_insert_statement(s, sql),
            SubQueryStatement::UpdateStatement(s) => self.prepare_update_statement(s, sql),
            SubQueryStatement::DeleteStatement(s) => self.prepare_delete_statement(s, sql),
            SubQueryStatement::WithStatement(s) => self.prepare_with_query(s, sql),
        }
    }

    fn prepare_value(&self, value: &Value, sql: &mut dyn SqlWriter) {
        sql.push_param(value.clone(), self);
    }

    fn placeholder(&self) -> (&str, bool) {
        (self.prefix, self.numbered)
    }
}
