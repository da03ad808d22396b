use sea_query::{Alias, Expr, ExprTrait, SimpleExpr, Value};

use crate::types::{DataType, datatype_to_value};

/// Predicate over the columns of a single table.
///
/// Values are supplied as [`DataType`] and converted to ``SeaQuery`` values
/// internally. An equality against a `NULL` value renders as `IS NULL` so
/// that key and lock comparisons on nullable columns behave as expected.
#[derive(Debug, Clone)]
pub enum Filter {
    /// column = value
    Eq(String, DataType),
    /// column != value
    Ne(String, DataType),
    /// column > value
    Gt(String, DataType),
    /// column >= value
    Gte(String, DataType),
    /// column < value
    Lt(String, DataType),
    /// column <= value
    Lte(String, DataType),
    /// column IN (values)
    In(String, Vec<DataType>),
    /// column IS NULL
    IsNull(String),
    /// column IS NOT NULL
    IsNotNull(String),
    /// column LIKE pattern
    Like(String, String),
    /// Logical AND of multiple filters
    And(Vec<Self>),
    /// Logical OR of multiple filters
    Or(Vec<Self>),
    /// Logical NOT of a filter
    Not(Box<Self>),
}

impl Filter {
    fn column(col: &str) -> SimpleExpr {
        Expr::col(Alias::new(col)).into()
    }

    fn value(value: DataType) -> Value {
        datatype_to_value(value)
    }

    /// Convert the filter to a ``SeaQuery`` expression.
    #[must_use]
    pub fn into_expr(self) -> SimpleExpr {
        match self {
            Self::Eq(col, val) if val.is_null() => Self::column(&col).is_null(),
            Self::Ne(col, val) if val.is_null() => Self::column(&col).is_not_null(),
            Self::Eq(col, val) => Self::column(&col).eq(Self::value(val)),
            Self::Ne(col, val) => Self::column(&col).ne(Self::value(val)),
            Self::Gt(col, val) => Self::column(&col).gt(Self::value(val)),
            Self::Gte(col, val) => Self::column(&col).gte(Self::value(val)),
            Self::Lt(col, val) => Self::column(&col).lt(Self::value(val)),
            Self::Lte(col, val) => Self::column(&col).lte(Self::value(val)),
            Self::In(col, vals) => {
                Self::column(&col).is_in(vals.into_iter().map(Self::value).collect::<Vec<_>>())
            }
            Self::IsNull(col) => Self::column(&col).is_null(),
            Self::IsNotNull(col) => Self::column(&col).is_not_null(),
            Self::Like(col, pattern) => Self::column(&col).like(pattern),
            Self::And(filters) => {
                let mut exprs = filters.into_iter().map(Self::into_expr);
                exprs.next().map_or_else(
                    || Expr::value(true), // no filters, so all conditions satisfied, hence `true`
                    |first| exprs.fold(first, SimpleExpr::and),
                )
            }
            Self::Or(filters) => {
                let mut exprs = filters.into_iter().map(Self::into_expr);
                exprs.next().map_or_else(
                    || Expr::value(false), // no filters, so 0 conditions satisfied, hence `false`
                    |first| exprs.fold(first, SimpleExpr::or),
                )
            }
            Self::Not(filter) => Expr::expr(filter.into_expr()).not(),
        }
    }

    /// Creates an equality filter (column = value).
    #[must_use]
    pub fn eq(col: impl Into<String>, val: impl Into<DataType>) -> Self {
        Self::Eq(col.into(), val.into())
    }

    /// Creates an inequality filter (column != value).
    #[must_use]
    pub fn ne(col: impl Into<String>, val: impl Into<DataType>) -> Self {
        Self::Ne(col.into(), val.into())
    }

    /// Creates a greater-than filter (column > value).
    #[must_use]
    pub fn gt(col: impl Into<String>, val: impl Into<DataType>) -> Self {
        Self::Gt(col.into(), val.into())
    }

    /// Creates a greater-than-or-equal filter (column >= value).
    #[must_use]
    pub fn gte(col: impl Into<String>, val: impl Into<DataType>) -> Self {
        Self::Gte(col.into(), val.into())
    }

    /// Creates a less-than filter (column < value).
    #[must_use]
    pub fn lt(col: impl Into<String>, val: impl Into<DataType>) -> Self {
        Self::Lt(col.into(), val.into())
    }

    /// Creates a less-than-or-equal filter (column <= value).
    #[must_use]
    pub fn lte(col: impl Into<String>, val: impl Into<DataType>) -> Self {
        Self::Lte(col.into(), val.into())
    }

    /// Creates an IN filter (column IN (values)).
    #[must_use]
    pub fn r#in(col: impl Into<String>, vals: impl IntoIterator<Item = impl Into<DataType>>) -> Self {
        Self::In(col.into(), vals.into_iter().map(Into::into).collect())
    }

    /// Creates an IS NULL filter.
    #[must_use]
    pub fn is_null(col: impl Into<String>) -> Self {
        Self::IsNull(col.into())
    }

    /// Creates an IS NOT NULL filter.
    #[must_use]
    pub fn is_not_null(col: impl Into<String>) -> Self {
        Self::IsNotNull(col.into())
    }

    /// Creates a LIKE filter with pattern matching.
    #[must_use]
    pub fn like(col: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like(col.into(), pattern.into())
    }

    /// Conjunction of equality filters, one per `(column, value)` pair.
    #[must_use]
    pub fn all_eq<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<DataType>,
    {
        Self::And(pairs.into_iter().map(|(col, val)| Self::eq(col, val)).collect())
    }
}
