//! Writing parsed result tables to a source.

use std::collections::HashSet;
use std::sync::Arc;

use rill_core::{Connection, Error, Result, Row, TableAddress};
use serde_json::Value;

use crate::project::Project;

const TRACING_TARGET: &str = "rill_runtime::loader";

/// Persists result rows into tables of one target source.
///
/// The connection is opened on the first write. The first write to a table
/// during the loader's lifetime replaces the table; later writes append.
/// [`close`](Self::close) must be called on every exit path.
pub struct DataLoader {
    project: Arc<dyn Project>,
    source: Option<String>,
    default_table: Option<TableAddress>,
    connection: Option<Box<dyn Connection>>,
    written: HashSet<TableAddress>,
    rows_written: usize,
}

impl DataLoader {
    /// Creates a loader writing to `source`.
    ///
    /// `default_table` receives rows returned as a plain list; its
    /// database and namespace also apply to tables returned by name.
    pub fn new(project: Arc<dyn Project>, source: Option<String>, default_table: Option<TableAddress>) -> Self {
        Self {
            project,
            source,
            default_table,
            connection: None,
            written: HashSet::new(),
            rows_written: 0,
        }
    }

    /// Total rows written so far.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Loads a `tables` value returned by a parser.
    ///
    /// Accepts null (nothing to load), a list of rows for the default table,
    /// or a mapping from table name to a list of rows.
    pub async fn run(&mut self, tables: &Value) -> Result<()> {
        match tables {
            Value::Null => Ok(()),
            Value::Array(rows) => {
                let table = self.default_table.clone().ok_or_else(|| {
                    Error::invalid_definition()
                        .with_message("response.table is required when the parser returns a list of rows")
                })?;
                self.write(table, rows).await
            }
            Value::Object(tables) => {
                for (name, rows) in tables {
                    let Value::Array(rows) = rows else {
                        return Err(Error::invalid_definition().with_message(format!(
                            "Rows for table '{name}' returned by the parser must be a list"
                        )));
                    };
                    let table = self.table_named(name);
                    self.write(table, rows).await?;
                }
                Ok(())
            }
            other => Err(Error::invalid_definition().with_message(format!(
                "\"tables\" in the result of the response parser must be a list or a mapping, got: {other}"
            ))),
        }
    }

    /// Releases the connection, if one was opened.
    pub async fn close(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(mut connection) => {
                tracing::debug!(
                    target: TRACING_TARGET,
                    rows = self.rows_written,
                    tables = self.written.len(),
                    "Data loader closed"
                );
                connection.close().await
            }
            None => Ok(()),
        }
    }

    fn table_named(&self, name: &str) -> TableAddress {
        let mut table = TableAddress::new(name);
        if let Some(default) = &self.default_table {
            table.namespace = default.namespace.clone();
            table.database = default.database.clone();
        }
        table
    }

    async fn write(&mut self, table: TableAddress, rows: &[Value]) -> Result<()> {
        let rows = rows
            .iter()
            .cloned()
            .map(Row::try_from)
            .collect::<Result<Vec<_>>>()?;

        let first_write = !self.written.contains(&table);
        let connection = self.connection().await?;
        if first_write {
            let columns = columns(&rows);
            connection.drop_table_if_exists(&table).await?;
            connection.create_table(&table, &columns).await?;
        }

        let count = rows.len();
        if count > 0 {
            connection.insert_rows(&table, rows).await?;
        }
        tracing::debug!(target: TRACING_TARGET, table = %table, rows = count, "Rows loaded");

        self.written.insert(table);
        self.rows_written += count;
        Ok(())
    }

    async fn connection(&mut self) -> Result<&mut Box<dyn Connection>> {
        if self.connection.is_none() {
            let name = self.source.as_deref().ok_or_else(|| {
                Error::invalid_definition().with_message("response.source is required to load tables")
            })?;
            let source = self.project.source(name)?;
            self.connection = Some(self.project.connect(&source).await?);
        }
        self.connection
            .as_mut()
            .ok_or_else(|| Error::internal().with_message("data loader connection missing"))
    }
}

impl std::fmt::Debug for DataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoader")
            .field("source", &self.source)
            .field("default_table", &self.default_table)
            .field("rows_written", &self.rows_written)
            .finish_non_exhaustive()
    }
}

/// Union of the columns of all rows, in first-seen order.
fn columns(rows: &[Row]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for row in rows {
        for column in row.columns() {
            if seen.insert(column.to_owned()) {
                columns.push(column.to_owned());
            }
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use rill_core::ErrorKind;
    use serde_json::json;

    use super::*;
    use crate::test_support::memory_project;

    #[tokio::test]
    async fn test_first_write_replaces_then_appends() {
        let project = memory_project();
        let store = project.store().clone();
        store.insert_table(TableAddress::new("users"), vec![Row::try_from(json!({"stale": true})).unwrap()]);

        let mut loader = DataLoader::new(Arc::new(project), Some("memory".into()), Some(TableAddress::new("users")));
        loader.run(&json!([{"id": 1}, {"id": 2, "name": "b"}])).await.unwrap();
        loader.run(&json!([{"id": 3}])).await.unwrap();
        loader.close().await.unwrap();

        let rows = store.rows(&TableAddress::new("users")).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(store.columns(&TableAddress::new("users")).unwrap(), vec!["id", "name"]);
        assert_eq!(loader.rows_written(), 3);
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_named_tables_inherit_namespace() {
        let project = memory_project();
        let store = project.store().clone();
        let default = TableAddress::new("unused").with_namespace("raw");
        let mut loader = DataLoader::new(Arc::new(project), Some("memory".into()), Some(default));
        loader
            .run(&json!({"orders": [{"id": 1}], "items": [{"sku": "a"}, {"sku": "b"}]}))
            .await
            .unwrap();
        loader.close().await.unwrap();

        assert_eq!(store.rows(&TableAddress::new("orders").with_namespace("raw")).unwrap().len(), 1);
        assert_eq!(store.rows(&TableAddress::new("items").with_namespace("raw")).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_source_is_user_error() {
        let mut loader = DataLoader::new(Arc::new(memory_project()), None, Some(TableAddress::new("t")));
        let err = loader.run(&json!([{"id": 1}])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
        loader.run(&Value::Null).await.unwrap();
        loader.close().await.unwrap();
    }
}
