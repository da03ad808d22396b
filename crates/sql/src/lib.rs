//! # Trellis SQL
//!
//! The database accessor boundary used by the `trellis-orm` mapping engine:
//!
//! - [`DataType`], [`Field`] and [`Record`]: values and streamed records.
//! - [`Connection`]: synchronous, forward-only execution contract.
//! - [`Dialect`]: pluggable per-dialect strategies (`SQLite`, `PostgreSQL`,
//!   `MySQL`) for primary-key discovery, generated identifiers and
//!   temporary-table DDL.
//! - [`InsertBuilder`], [`UpdateBuilder`], [`DeleteBuilder`] and [`Filter`]:
//!   single-table statements built with ``SeaQuery``.
//! - [`Params`] and [`bind`]: named `@param` binding with automatic
//!   expansion of sequence parameters for `IN (…)` lists.
//! - [`TempTable`] and [`with_temp_tables`]: temporary tables scoped to a
//!   single query.
//! - [`SqliteConnection`]: the default backend.
//!
//! ```ignore
//! use trellis_sql::{Backend, Connection, Params, SqliteConnection, bind};
//!
//! let mut conn = SqliteConnection::connect()?;
//! let params = Params::new().list("ids", [1_i64, 2, 3]);
//! let stmt = bind("SELECT * FROM orders WHERE id IN (@ids)", &params, conn.dialect())?;
//! let records = conn.query_all(&stmt.sql, &stmt.params)?;
//! ```

#![forbid(unsafe_code)]

mod connection;
mod delete;
mod dialect;
mod filter;
mod insert;
mod params;
mod query;
mod sqlite;
mod temp;
mod traits;
mod types;
mod update;

pub use connection::Connection;
pub use delete::DeleteBuilder;
pub use dialect::{Dialect, DialectKind, MySql, Postgres, Sqlite};
pub use filter::Filter;
pub use insert::InsertBuilder;
pub use params::{Param, Params, bind, expand};
pub use query::Statement;
pub use sqlite::{ConnectOptions, SqliteConnection};
pub use temp::{TempTable, with_temp_tables};
pub use traits::{Backend, FromEnv};
pub use types::{DataType, Field, Record, into_json};
pub use update::UpdateBuilder;
