//! Source connection contract.

use async_trait::async_trait;

use crate::error::Result;
use crate::row::Row;
use crate::table::TableAddress;

/// An open connection to a table-bearing source.
///
/// Connections are scoped resources: callers open one before a read or
/// write loop and must call [`Connection::close`] on every exit path.
#[async_trait]
pub trait Connection: Send {
    /// Starts a full scan of a table. Rows are then pulled with
    /// [`Connection::next_row`].
    async fn open_table_for_read(&mut self, table: &TableAddress) -> Result<()>;

    /// Returns the next row of the open scan, or `None` when exhausted.
    async fn next_row(&mut self) -> Result<Option<Row>>;

    /// Executes a statement that does not return rows.
    async fn execute_update(&mut self, statement: &str) -> Result<()>;

    /// Drops a table if it exists.
    async fn drop_table_if_exists(&mut self, table: &TableAddress) -> Result<()>;

    /// Creates an empty table with the given columns, replacing any existing one.
    async fn create_table(&mut self, table: &TableAddress, columns: &[String]) -> Result<()>;

    /// Appends rows to a table.
    async fn insert_rows(&mut self, table: &TableAddress, rows: Vec<Row>) -> Result<()>;

    /// Releases the connection.
    async fn close(&mut self) -> Result<()>;

    /// Renders a statement materializing `query` into `table`.
    fn create_table_as(&self, query: &str, table: &TableAddress) -> String {
        format!("CREATE TABLE {} AS {query}", table.qualified_name())
    }
}
