//! # Database accessor
//!
//! Row-level persistence used by the save engine: primary-key discovery,
//! single-row statements driven by a [`ParamFilter`], generated identifier
//! retrieval and parameterized streaming queries.

use std::collections::HashMap;

use anyhow::anyhow;
use tracing::debug;
use trellis_sql::{
    Connection, DataType, DeleteBuilder, Dialect, Filter, InsertBuilder, Params, Record,
    TempTable, UpdateBuilder, bind,
};

use crate::binder;
use crate::entity::Node;
use crate::error::{Error, Result};
use crate::row::Row;

/// Primary-key columns per table, discovered once and reused.
///
/// The cache belongs to the caller: one per [`Mapper`](crate::Mapper) by
/// default, or shared between mappers over the same schema.
#[derive(Debug, Clone, Default)]
pub struct KeyCache {
    tables: HashMap<String, Vec<String>>,
}

impl KeyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the primary key of `table`, replacing any cached entry.
    pub fn insert(&mut self, table: &str, columns: Vec<String>) {
        self.tables.insert(table.to_ascii_lowercase(), columns);
    }

    /// Cached primary key of `table`.
    #[must_use]
    pub fn get(&self, table: &str) -> Option<&[String]> {
        self.tables.get(&table.to_ascii_lowercase()).map(Vec::as_slice)
    }

    /// Number of cached tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Selects which columns of a row a statement uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamFilter {
    /// Every column.
    All,
    /// Primary-key columns only.
    PrimaryKeys,
    /// Every column except the primary key.
    NonPrimaryKeys,
    /// Optimistic-lock columns only.
    LockColumns,
}

/// Row-level access to one connection.
pub struct Accessor<'c> {
    conn: &'c mut dyn Connection,
    keys: &'c mut KeyCache,
}

impl<'c> Accessor<'c> {
    /// Wraps a connection.
    pub const fn new(conn: &'c mut dyn Connection, keys: &'c mut KeyCache) -> Self {
        Self { conn, keys }
    }

    /// Returns `true` while the connection has an open transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.conn.in_transaction()
    }

    /// The connection's dialect.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.conn.dialect()
    }

    /// Primary-key columns of `table`, in key order. Empty when the table
    /// has no primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the discovery query fails.
    pub fn primary_keys(&mut self, table: &str) -> Result<Vec<String>> {
        if let Some(keys) = self.keys.get(table) {
            return Ok(keys.to_vec());
        }

        let (sql, params) = self.conn.dialect().primary_keys_query(table);
        let records = self.conn.query_all(&sql, &params)?;
        let keys: Vec<String> = records
            .iter()
            .filter_map(|record| record.fields.first().and_then(|field| field.value.render()))
            .collect();

        debug!(table, keys = ?keys, "discovered primary key");
        self.keys.insert(table, keys.clone());
        Ok(keys)
    }

    /// Inserts the selected columns of `row` and returns the affected count.
    ///
    /// # Errors
    ///
    /// Returns an error if the row has no table or the statement fails.
    pub fn insert(&mut self, row: &Row, filter: ParamFilter) -> Result<u64> {
        let table = table_of(row)?;
        let statement =
            InsertBuilder::new(table).set_all(select(row, filter)).build(self.dialect())?;
        let affected = self.conn.exec(&statement.sql, &statement.params)?;
        debug!(table, path = row.path(), affected, "inserted row");
        Ok(affected)
    }

    /// Updates the selected non-key columns of `row`, matching its primary
    /// key and expected lock values. Returns the affected count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the table has no primary key, or an
    /// error if the statement fails.
    pub fn update(&mut self, row: &Row, filter: ParamFilter) -> Result<u64> {
        let table = table_of(row)?;
        if row.primary_keys().is_empty() {
            return Err(Error::config(row.path(), format!("table '{table}' has no primary key")));
        }

        let mut assignments: Vec<(String, DataType)> = select(row, filter)
            .into_iter()
            .filter(|(column, _)| !contains(row.primary_keys(), column))
            .collect();
        if assignments.is_empty() {
            // still detects a missing row
            assignments = key_values(row);
        }

        let mut matched = key_values(row);
        matched.extend(row.lock_current().iter().cloned());

        let mut update = UpdateBuilder::new(table);
        for (column, value) in assignments {
            update = update.set(column, value);
        }
        let statement = update.r#where(Filter::all_eq(matched)).build(self.dialect())?;
        let affected = self.conn.exec(&statement.sql, &statement.params)?;
        debug!(table, path = row.path(), affected, "updated row");
        Ok(affected)
    }

    /// Deletes the row matching the selected columns of `row` and its
    /// expected lock values. Returns the affected count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when nothing would constrain the delete, or an
    /// error if the row has no table or the statement fails.
    pub fn delete(&mut self, row: &Row, filter: ParamFilter) -> Result<u64> {
        let table = table_of(row)?;
        let lock_columns = lock_columns(row);

        let mut matched: Vec<(String, DataType)> = select(row, filter)
            .into_iter()
            .filter(|(column, _)| !contains(&lock_columns, column))
            .collect();
        matched.extend(row.lock_current().iter().cloned());
        if matched.is_empty() {
            let reason = format!("delete from '{table}' has no condition");
            return Err(Error::config(row.path(), reason));
        }

        let statement =
            DeleteBuilder::new(table).r#where(Filter::all_eq(matched)).build(self.dialect())?;
        let affected = self.conn.exec(&statement.sql, &statement.params)?;
        debug!(table, path = row.path(), affected, "deleted row");
        Ok(affected)
    }

    /// Identifier generated by the last auto-id insert on this connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the dialect query yields nothing.
    pub fn last_insert_id(&mut self) -> Result<DataType> {
        let sql = self.conn.dialect().last_insert_id_query();
        let records = self.conn.query_all(sql, &[])?;
        records
            .into_iter()
            .next()
            .and_then(|record| record.fields.into_iter().next())
            .map(|field| field.value)
            .ok_or_else(|| Error::from(anyhow!("no generated identifier returned")))
    }

    /// Binds named parameters into `sql` and streams each record to `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or execution fails, or the error `sink`
    /// returned.
    pub fn query(
        &mut self, sql: &str, params: &Params, sink: &mut dyn FnMut(Record) -> anyhow::Result<()>,
    ) -> Result<()> {
        let statement = bind(sql, params, self.dialect())?;
        self.conn.query(&statement.sql, &statement.params, sink)?;
        Ok(())
    }

    /// Provisions `tables`, runs `f` and drops the tables on every exit path.
    ///
    /// # Errors
    ///
    /// Returns a provisioning or drop error, or the error from `f`.
    pub fn with_temp_tables<T>(
        &mut self, tables: &[TempTable], f: impl FnOnce(&mut Accessor<'_>) -> Result<T>,
    ) -> Result<T> {
        let keys = &mut *self.keys;
        trellis_sql::with_temp_tables(&mut *self.conn, tables, |conn| {
            f(&mut Accessor::new(conn, keys))
        })
    }
}

/// Adds one seed row per entity to `table`, using the entity's scalar fields
/// as columns.
#[must_use]
pub fn seed_entities<'a, T: Node + 'a>(
    mut table: TempTable, entities: impl IntoIterator<Item = &'a T>,
) -> TempTable {
    for entity in entities {
        table.rows.push(binder::bind_from(entity).into_iter().collect());
    }
    table
}

fn table_of<'r>(row: &Row<'r>) -> Result<&'r str> {
    row.table().ok_or_else(|| Error::config(row.path(), "rule has no table"))
}

fn contains(columns: &[String], column: &str) -> bool {
    columns.iter().any(|known| known.eq_ignore_ascii_case(column))
}

fn lock_columns(row: &Row) -> Vec<String> {
    row.rule().optimistic_lock().map(|lock| lock.columns.clone()).unwrap_or_default()
}

fn key_values(row: &Row) -> Vec<(String, DataType)> {
    row.primary_keys()
        .iter()
        .map(|key| (key.clone(), row.column(key).cloned().unwrap_or_else(DataType::null)))
        .collect()
}

fn select(row: &Row, filter: ParamFilter) -> Vec<(String, DataType)> {
    let keys = row.primary_keys();
    let locks = lock_columns(row);
    row.columns()
        .filter(|(column, _)| match filter {
            ParamFilter::All => true,
            ParamFilter::PrimaryKeys => contains(keys, column),
            ParamFilter::NonPrimaryKeys => !contains(keys, column),
            ParamFilter::LockColumns => contains(&locks, column),
        })
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use trellis_sql::SqliteConnection;

    use super::*;
    use crate::map::MapEntity;
    use crate::rule::{OptimisticLock, Rule};

    fn connection() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, version INTEGER);
             CREATE TABLE pairs (a INTEGER, b INTEGER, note TEXT, PRIMARY KEY (b, a));
             CREATE TABLE loose (x INTEGER);",
        )
        .unwrap();
        conn
    }

    fn row<'r>(rule: &'r Rule, pairs: &[(&str, DataType)]) -> Row<'r> {
        Row::from_columns(rule, pairs.iter().map(|(n, v)| ((*n).to_string(), v.clone())).collect())
    }

    #[test]
    fn discovers_and_caches_primary_keys() {
        let mut conn = connection();
        let mut keys = KeyCache::new();
        let mut accessor = Accessor::new(&mut conn, &mut keys);

        assert_eq!(accessor.primary_keys("pairs").unwrap(), vec!["b", "a"]);
        assert_eq!(accessor.primary_keys("items").unwrap(), vec!["id"]);
        assert!(accessor.primary_keys("loose").unwrap().is_empty());
        assert_eq!(keys.len(), 3);
        assert_eq!(keys.get("PAIRS"), Some(["b".to_string(), "a".to_string()].as_slice()));
    }

    #[test]
    fn insert_update_delete_with_lock() {
        let mut conn = connection();
        let mut keys = KeyCache::new();
        let mut accessor = Accessor::new(&mut conn, &mut keys);
        let rule = Rule::root::<MapEntity>()
            .table("items")
            .auto_id()
            .lock(OptimisticLock::version("version"));

        let pk = accessor.primary_keys("items").unwrap();
        let new = row(&rule, &[("id", DataType::Int64(None)), ("name", "a".into()), ("version", 1_i64.into())])
            .with_primary_keys(pk.clone());
        assert_eq!(accessor.insert(&new, ParamFilter::NonPrimaryKeys).unwrap(), 1);
        let id = accessor.last_insert_id().unwrap();
        assert_eq!(id, DataType::Int64(Some(1)));

        let stale = row(&rule, &[("id", id.clone()), ("name", "b".into()), ("version", 3_i64.into())])
            .with_primary_keys(pk.clone())
            .with_lock_current(vec![("version".into(), 2_i64.into())]);
        assert_eq!(accessor.update(&stale, ParamFilter::All).unwrap(), 0);

        let fresh = stale.clone().with_lock_current(vec![("version".into(), 1_i64.into())]);
        assert_eq!(accessor.update(&fresh, ParamFilter::All).unwrap(), 1);

        assert_eq!(accessor.delete(&fresh, ParamFilter::PrimaryKeys).unwrap(), 0);
        let current = fresh.with_lock_current(vec![("version".into(), 3_i64.into())]);
        assert_eq!(accessor.delete(&current, ParamFilter::PrimaryKeys).unwrap(), 1);
    }

    #[test]
    fn lock_columns_update_touches_only_the_lock() {
        let mut conn = connection();
        conn.execute_batch("INSERT INTO items (name, version) VALUES ('kept', 1);").unwrap();
        let rule = Rule::root::<MapEntity>()
            .table("items")
            .auto_id()
            .lock(OptimisticLock::version("version"));
        let mut keys = KeyCache::new();
        {
            let mut accessor = Accessor::new(&mut conn, &mut keys);
            let pk = accessor.primary_keys("items").unwrap();
            let columns: [(&str, DataType); 3] =
                [("id", 1_i64.into()), ("name", "lost".into()), ("version", 2_i64.into())];
            let touched = row(&rule, &columns)
                .with_primary_keys(pk)
                .with_lock_current(vec![("version".into(), 1_i64.into())]);
            assert_eq!(accessor.update(&touched, ParamFilter::LockColumns).unwrap(), 1);
        }

        let rows = conn.query_all("SELECT name, version FROM items", &[]).unwrap();
        assert_eq!(rows[0].get("name"), Some(&DataType::from("kept")));
        assert_eq!(rows[0].get("version"), Some(&DataType::from(2_i64)));
    }

    #[test]
    fn update_requires_primary_key() {
        let mut conn = connection();
        let mut keys = KeyCache::new();
        let mut accessor = Accessor::new(&mut conn, &mut keys);
        let rule = Rule::root::<MapEntity>().table("loose");

        let err = accessor.update(&row(&rule, &[("x", 1_i64.into())]), ParamFilter::All).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn query_expands_lists() {
        let mut conn = connection();
        conn.execute_batch("INSERT INTO items (name) VALUES ('a'), ('b'), ('c');").unwrap();
        let mut keys = KeyCache::new();
        let mut accessor = Accessor::new(&mut conn, &mut keys);

        let mut names = Vec::new();
        accessor
            .query(
                "SELECT name FROM items WHERE id IN (@ids) ORDER BY id",
                &Params::new().list("ids", [1_i64, 3]),
                &mut |record| {
                    names.push(record.fields[0].value.render());
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(names, vec![Some("a".to_string()), Some("c".to_string())]);
    }

    #[test]
    fn seeds_temp_tables_from_entities() {
        let mut conn = connection();
        let mut keys = KeyCache::new();
        let mut accessor = Accessor::new(&mut conn, &mut keys);

        let wanted = [MapEntity::from_pairs([("id", 2_i64)]), MapEntity::from_pairs([("id", 3_i64)])];
        let table = seed_entities(TempTable::new("wanted", "id INTEGER"), &wanted);
        assert_eq!(table.rows.len(), 2);

        let count = accessor
            .with_temp_tables(&[table], |inner| {
                let mut count = 0;
                inner.query("SELECT id FROM wanted", &Params::new(), &mut |_| {
                    count += 1;
                    Ok(())
                })?;
                Ok(count)
            })
            .unwrap();
        assert_eq!(count, 2);
    }
}
