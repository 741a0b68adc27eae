//! In-process project and table store.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rill_core::{Connection, Error, Result, Row, TableAddress};
use serde_json::{Map, Value};

use super::{Project, SourceDefinition};
use crate::eval::Document;
use crate::op::{FlowDefinition, OpDefinition};

/// Source type served by [`MemoryStore`].
pub const MEMORY_SOURCE_KIND: &str = "memory";

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<TableAddress, MemoryTable>,
    statements: Vec<String>,
    open_connections: usize,
}

/// Tables kept in memory, shared by every connection opened on it.
///
/// Statements passed to [`Connection::execute_update`] are recorded rather
/// than interpreted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a table.
    pub fn insert_table(&self, table: TableAddress, rows: Vec<Row>) {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for column in row.columns() {
                if !columns.iter().any(|known| known == column) {
                    columns.push(column.to_owned());
                }
            }
        }
        self.lock().tables.insert(table, MemoryTable { columns, rows });
    }

    /// Returns a copy of a table's rows.
    pub fn rows(&self, table: &TableAddress) -> Option<Vec<Row>> {
        self.lock().tables.get(table).map(|table| table.rows.clone())
    }

    /// Returns a table's columns.
    pub fn columns(&self, table: &TableAddress) -> Option<Vec<String>> {
        self.lock().tables.get(table).map(|table| table.columns.clone())
    }

    /// Returns the recorded statements, oldest first.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Number of connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }

    /// Opens a connection.
    pub fn connect(&self) -> MemoryConnection {
        self.lock().open_connections += 1;
        MemoryConnection {
            store: self.clone(),
            scan: None,
            closed: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnection {
    store: MemoryStore,
    scan: Option<VecDeque<Row>>,
    closed: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::connector().with_message("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open_table_for_read(&mut self, table: &TableAddress) -> Result<()> {
        self.ensure_open()?;
        let rows = self
            .store
            .rows(table)
            .ok_or_else(|| Error::not_found().with_message(format!("Table {table} does not exist")))?;
        self.scan = Some(rows.into());
        Ok(())
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        self.ensure_open()?;
        let scan = self
            .scan
            .as_mut()
            .ok_or_else(|| Error::internal().with_message("no table is open for reading"))?;
        Ok(scan.pop_front())
    }

    async fn execute_update(&mut self, statement: &str) -> Result<()> {
        self.ensure_open()?;
        self.store.lock().statements.push(statement.to_owned());
        Ok(())
    }

    async fn drop_table_if_exists(&mut self, table: &TableAddress) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.store.lock();
        state.tables.remove(table);
        state
            .statements
            .push(format!("DROP TABLE IF EXISTS {}", table.qualified_name()));
        Ok(())
    }

    async fn create_table(&mut self, table: &TableAddress, columns: &[String]) -> Result<()> {
        self.ensure_open()?;
        self.store.lock().tables.insert(
            table.clone(),
            MemoryTable {
                columns: columns.to_vec(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn insert_rows(&mut self, table: &TableAddress, rows: Vec<Row>) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.store.lock();
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::not_found().with_message(format!("Table {table} does not exist")))?;
        for row in &rows {
            for column in row.columns() {
                if !target.columns.iter().any(|known| known == column) {
                    target.columns.push(column.to_owned());
                }
            }
        }
        target.rows.extend(rows);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.scan = None;
            let mut state = self.store.lock();
            state.open_connections = state.open_connections.saturating_sub(1);
        }
        Ok(())
    }
}

/// A project held entirely in memory.
///
/// Sources of type `memory` connect to the project's [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryProject {
    name: String,
    flows: BTreeMap<String, FlowDefinition>,
    sources: HashMap<String, SourceDefinition>,
    store: MemoryStore,
}

impl MemoryProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds or replaces a flow.
    pub fn with_flow(mut self, flow: FlowDefinition) -> Self {
        self.flows.insert(flow.name.clone(), flow);
        self
    }

    /// Adds a flow built from step mappings.
    ///
    /// # Panics
    ///
    /// Panics if a step is not a mapping with an `op` key.
    pub fn with_flow_steps(self, name: &str, steps: Vec<Value>) -> Self {
        let document = Document::new(format!("flows/{name}.yaml"));
        let steps = steps
            .into_iter()
            .map(|step| OpDefinition::from_value(step, document.clone()))
            .collect::<Result<Vec<_>>>()
            .unwrap_or_else(|err| panic!("invalid step in flow '{name}': {err}"));
        self.with_flow(FlowDefinition {
            name: name.to_owned(),
            description: None,
            steps,
        })
    }

    /// Adds or replaces a source.
    pub fn with_source(mut self, source: SourceDefinition) -> Self {
        self.sources.insert(source.name.clone(), source);
        self
    }

    /// Adds a source of the given type from a mapping of fields.
    pub fn with_source_fields(self, name: &str, kind: &str, fields: Map<String, Value>) -> Self {
        self.with_source(SourceDefinition {
            name: name.to_owned(),
            kind: kind.to_owned(),
            fields,
            document: Document::new(format!("sources/{name}.yaml")),
        })
    }

    /// Adds a source backed by the project's store.
    pub fn with_memory_source(self, name: &str) -> Self {
        self.with_source_fields(name, MEMORY_SOURCE_KIND, Map::new())
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl Project for MemoryProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn flow_names(&self) -> Vec<String> {
        self.flows.keys().cloned().collect()
    }

    fn flow(&self, name: &str) -> Result<FlowDefinition> {
        self.flows
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found().with_message(format!("Flow '{name}' not found")))
    }

    fn source(&self, name: &str) -> Result<SourceDefinition> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found().with_message(format!("Source '{name}' not found")))
    }

    async fn connect(&self, source: &SourceDefinition) -> Result<Box<dyn Connection>> {
        match source.kind.as_str() {
            MEMORY_SOURCE_KIND => Ok(Box::new(self.store.connect())),
            other => Err(Error::invalid_definition().with_message(format!(
                "Source '{}' of type '{other}' does not support table connections",
                source.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use rill_core::ErrorKind;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_memory_connection_round_trip() {
        let store = MemoryStore::new();
        let table = TableAddress::new("t").with_namespace("ns");
        let mut conn = store.connect();
        conn.create_table(&table, &["a".to_owned()]).await.unwrap();
        conn.insert_rows(&table, vec![Row::try_from(json!({"a": 1, "b": 2})).unwrap()])
            .await
            .unwrap();
        conn.open_table_for_read(&table).await.unwrap();
        assert!(conn.next_row().await.unwrap().is_some());
        assert!(conn.next_row().await.unwrap().is_none());
        assert_eq!(store.columns(&table).unwrap(), vec!["a", "b"]);

        conn.close().await.unwrap();
        assert_eq!(store.open_connections(), 0);
        assert_eq!(conn.execute_update("x").await.unwrap_err().kind(), ErrorKind::Connector);
    }

    #[test]
    fn test_project_lookups() {
        let project = MemoryProject::new("demo")
            .with_flow_steps("b", vec![json!({"op": "print", "message": "x"})])
            .with_flow_steps("a", vec![])
            .with_memory_source("memory");
        assert_eq!(project.flow_names(), vec!["a", "b"]);
        assert_eq!(project.flow("c").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(project.source("memory").unwrap().kind, "memory");
        assert_eq!(project.source("nope").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_non_table_source_cannot_connect() {
        let project = MemoryProject::new("demo").with_source_fields("api", "http", Map::new());
        let source = project.source("api").unwrap();
        assert!(project.connect(&source).await.is_err());
    }
}
