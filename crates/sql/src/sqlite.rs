//! Default `SQLite` backend.
//!
//! Suitable for development, tests and embedded use.

use anyhow::{Context, Result};
use fromenv::FromEnv;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{Connection as RawConnection, params_from_iter};
use tracing::instrument;

use crate::connection::Connection;
use crate::dialect::{Dialect, Sqlite};
use crate::traits::Backend;
use crate::types::{DataType, Field, Record};

/// Options used to open the `SQLite` database.
///
/// Loaded from environment variables.
#[derive(Debug, Clone, FromEnv)]
pub struct ConnectOptions {
    /// Database path or URI.
    #[env(from = "SQL_DATABASE", default = "file::memory:?cache=shared")]
    pub database: String,
}

impl crate::traits::FromEnv for ConnectOptions {
    fn from_env() -> Result<Self> {
        Self::from_env().finalize().context("issue loading connection options")
    }
}

/// `SQLite` connection implementing [`Connection`].
#[derive(Debug)]
pub struct SqliteConnection {
    conn: RawConnection,
}

impl Backend for SqliteConnection {
    type ConnectOptions = ConnectOptions;

    #[instrument]
    fn connect_with(options: Self::ConnectOptions) -> Result<Self> {
        tracing::debug!("opening SQLite database: {}", options.database);
        let conn =
            RawConnection::open(&options.database).context("failed to open SQLite database")?;
        Ok(Self { conn })
    }
}

impl SqliteConnection {
    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = RawConnection::open_in_memory().context("failed to open SQLite database")?;
        Ok(Self { conn })
    }

    /// Executes a batch of semicolon separated statements without parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).context("failed to execute batch")
    }

    /// Opens an explicit transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already open.
    pub fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN").context("failed to begin transaction")
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open or the commit fails.
    pub fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT").context("failed to commit transaction")
    }

    /// Rolls back the open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open.
    pub fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").context("failed to roll back transaction")
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> &dyn Dialect {
        &Sqlite
    }

    fn query(
        &mut self, sql: &str, params: &[DataType], sink: &mut dyn FnMut(Record) -> Result<()>,
    ) -> Result<()> {
        tracing::debug!("executing query: {sql}");

        let mut stmt = self.conn.prepare(sql).context("failed to prepare statement")?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(ToString::to_string).collect();

        let values = params.iter().map(datatype_to_sqlite_value).collect::<Result<Vec<_>>>()?;
        let mut rows =
            stmt.query(params_from_iter(values.iter())).context("failed to execute query")?;

        let mut index = 0;
        while let Some(row) = rows.next().context("failed to fetch row")? {
            let mut fields = Vec::with_capacity(column_names.len());
            for (i, name) in column_names.iter().enumerate() {
                let value = row.get_ref(i).context("failed to get column value")?;
                fields.push(Field {
                    name: name.clone(),
                    value: sqlite_value_to_datatype(value)?,
                });
            }

            sink(Record { index, fields })?;
            index += 1;
        }

        Ok(())
    }

    fn exec(&mut self, sql: &str, params: &[DataType]) -> Result<u64> {
        tracing::debug!("executing statement: {sql}");

        let mut stmt = self.conn.prepare(sql).context("failed to prepare statement")?;
        let values = params.iter().map(datatype_to_sqlite_value).collect::<Result<Vec<_>>>()?;
        let affected = stmt
            .execute(params_from_iter(values.iter()))
            .context("failed to execute statement")?;

        Ok(affected as u64)
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

fn datatype_to_sqlite_value(dt: &DataType) -> Result<SqliteValue> {
    let value = match dt {
        DataType::Boolean(Some(b)) => SqliteValue::Integer(i64::from(*b)),
        DataType::Int32(Some(i)) => SqliteValue::Integer(i64::from(*i)),
        DataType::Int64(Some(i)) => SqliteValue::Integer(*i),
        DataType::Uint32(Some(u)) => SqliteValue::Integer(i64::from(*u)),
        DataType::Uint64(Some(u)) => SqliteValue::Integer(
            i64::try_from(*u).with_context(|| format!("{u} does not fit a SQLite integer"))?,
        ),
        DataType::Float(Some(f)) => SqliteValue::Real(f64::from(*f)),
        DataType::Double(Some(f)) => SqliteValue::Real(*f),
        DataType::Str(Some(s))
        | DataType::Date(Some(s))
        | DataType::Time(Some(s))
        | DataType::Timestamp(Some(s)) => SqliteValue::Text(s.clone()),
        DataType::Binary(Some(b)) => SqliteValue::Blob(b.clone()),
        // All None variants map to NULL
        _ => SqliteValue::Null,
    };
    Ok(value)
}

fn sqlite_value_to_datatype(value: ValueRef) -> Result<DataType> {
    match value {
        ValueRef::Null => Ok(DataType::null()),
        ValueRef::Integer(i) => Ok(DataType::Int64(Some(i))),
        ValueRef::Real(f) => Ok(DataType::Double(Some(f))),
        ValueRef::Text(t) => {
            let s = std::str::from_utf8(t).context("invalid UTF-8 in text value")?;
            Ok(DataType::Str(Some(s.to_string())))
        }
        ValueRef::Blob(b) => Ok(DataType::Binary(Some(b.to_vec()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_operations() {
        let mut conn = SqliteConnection::connect_with(ConnectOptions {
            database: ":memory:".to_string(),
        })
        .expect("connect");

        let affected = conn
            .exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)", &[])
            .expect("create table");
        assert_eq!(affected, 0);

        let affected = conn
            .exec(
                "INSERT INTO users (name, age) VALUES ($1, $2)",
                &[DataType::Str(Some("Alice".to_string())), DataType::Int32(Some(30))],
            )
            .expect("insert");
        assert_eq!(affected, 1);

        conn.exec("INSERT INTO users (name, age) VALUES ($1, $2)", &["Bob".into(), 25_i32.into()])
            .expect("insert");

        let rows =
            conn.query_all("SELECT id, name, age FROM users ORDER BY name", &[]).expect("query");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fields[1].name, "name");
        assert_eq!(rows[0].get("name"), Some(&DataType::Str(Some("Alice".to_string()))));
        assert_eq!(rows[1].index, 1);
    }

    #[test]
    fn streaming_stops_on_sink_error() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1), (2), (3);")
            .unwrap();

        let mut seen = 0;
        let result = conn.query("SELECT v FROM t ORDER BY v", &[], &mut |_| {
            seen += 1;
            if seen == 2 { anyhow::bail!("enough") } else { Ok(()) }
        });

        assert!(result.is_err());
        assert_eq!(seen, 2);
    }

    #[test]
    fn oversized_unsigned_is_rejected() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();

        conn.exec("INSERT INTO t VALUES ($1)", &[DataType::Uint64(Some(7))]).unwrap();
        let err = conn.exec("INSERT INTO t VALUES ($1)", &[DataType::Uint64(Some(u64::MAX))]);

        assert!(err.is_err());
        let rows = conn.query_all("SELECT v FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("v"), Some(&DataType::Int64(Some(7))));
    }

    #[test]
    fn transaction_state() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        assert!(!conn.in_transaction());
        conn.begin().unwrap();
        assert!(conn.in_transaction());
        conn.rollback().unwrap();
        assert!(!conn.in_transaction());
    }

    #[test]
    fn primary_keys_and_last_insert_id() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE pairs (a INTEGER, b TEXT, c TEXT, PRIMARY KEY (b, a))")
            .unwrap();

        let (sql, params) = Sqlite.primary_keys_query("pairs");
        let keys: Vec<_> = conn
            .query_all(&sql, &params)
            .unwrap()
            .into_iter()
            .map(|record| record.fields[0].value.clone())
            .collect();
        assert_eq!(keys, vec![DataType::from("b"), DataType::from("a")]);

        conn.execute_batch("CREATE TABLE auto (id INTEGER PRIMARY KEY, v TEXT)").unwrap();
        conn.exec("INSERT INTO auto (v) VALUES ($1)", &["x".into()]).unwrap();
        let rows = conn.query_all(Sqlite.last_insert_id_query(), &[]).unwrap();
        assert_eq!(rows[0].fields[0].value, DataType::Int64(Some(1)));
    }
}
