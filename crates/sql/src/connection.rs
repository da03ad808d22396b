use std::fmt::Debug;

use anyhow::Result;

use crate::dialect::Dialect;
use crate::types::{DataType, Record};

/// SQL backends implement [`Connection`] to execute statements on behalf of
/// the mapping engine.
///
/// Connections are synchronous and forward-only: records are handed to the
/// sink one at a time, in result order, and are never buffered by the
/// contract itself. A connection never opens or commits a transaction on
/// its own.
pub trait Connection: Debug {
    /// The dialect strategy used to generate SQL for this connection.
    fn dialect(&self) -> &dyn Dialect;

    /// Execute a query, streaming each resulting record to `sink`.
    ///
    /// An error returned by `sink` stops the stream and is propagated.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement cannot be prepared or executed.
    fn query(
        &mut self, sql: &str, params: &[DataType], sink: &mut dyn FnMut(Record) -> Result<()>,
    ) -> Result<()>;

    /// Execute a statement that does not return rows (e.g. `INSERT`,
    /// `UPDATE`, `DELETE` or DDL) and return the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement cannot be prepared or executed.
    fn exec(&mut self, sql: &str, params: &[DataType]) -> Result<u64>;

    /// Returns `true` while an explicit transaction is open.
    fn in_transaction(&self) -> bool;

    /// Execute a query and collect every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement cannot be prepared or executed.
    fn query_all(&mut self, sql: &str, params: &[DataType]) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        self.query(sql, params, &mut |record| {
            records.push(record);
            Ok(())
        })?;
        Ok(records)
    }
}
