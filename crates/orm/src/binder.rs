//! Name-matched transfer between entities and rows.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use trellis_sql::DataType;

use crate::entity::Node;
use crate::row::Row;

/// Copies row columns into `node`.
///
/// Each field reads the column `prefix + field`, exact match first, then
/// ASCII case-insensitive; fields without a column keep their value. Open
/// entities take every column that carries the prefix, with the prefix
/// stripped, except columns under a longer prefix claimed by another rule.
///
/// # Errors
///
/// Returns an error if a column cannot be converted to its field.
pub fn bind_to(node: &mut dyn Node, row: &Row) -> Result<()> {
    if node.is_open() {
        let rule = row.rule();
        let prefix = rule.column_prefix();
        for (column, value) in row.columns() {
            if rule.claimed_prefixes().iter().any(|other| strip_prefix(column, other).is_some()) {
                continue;
            }
            let Some(field) = strip_prefix(column, prefix) else {
                continue;
            };
            node.set_field(field, value).with_context(|| format!("binding column '{column}'"))?;
        }
        return Ok(());
    }

    for field in node.field_names() {
        if let Some(value) = row.get(&field) {
            node.set_field(&field, value).with_context(|| format!("binding field '{field}'"))?;
        }
    }
    Ok(())
}

/// Reads every scalar field of `node` as a column of the same name.
#[must_use]
pub fn bind_from(node: &dyn Node) -> IndexMap<String, DataType> {
    node.field_names()
        .into_iter()
        .filter_map(|field| node.get_field(&field).map(|value| (field, value)))
        .collect()
}

fn strip_prefix<'c>(column: &'c str, prefix: &str) -> Option<&'c str> {
    if prefix.is_empty() {
        return Some(column);
    }
    let head = column.get(..prefix.len())?;
    (head.eq_ignore_ascii_case(prefix) && column.len() > prefix.len())
        .then(|| &column[prefix.len()..])
}
