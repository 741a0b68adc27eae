//! `for_each` modifier.

use rill_core::{Connection, Error, Result, Row, TableAddress};
use serde_json::Value;

use super::Params;
use crate::context::ExecutionContext;
use crate::eval::Document;

const TRACING_TARGET: &str = "rill_runtime::op::for_each";

/// Iteration over the rows of a source table, each bound to a variable.
///
/// Parsed when the op is built; resolved only when the scan starts so that
/// debug runs supplying a literal row never need the source.
#[derive(Debug, Clone)]
pub struct ForEach {
    fields: serde_json::Map<String, Value>,
    document: Document,
}

impl ForEach {
    /// Reads the `for_each` section of a definition, if present.
    pub fn parse(params: &Params<'_>) -> Result<Option<Self>> {
        let Some(section) = params.section("for_each")? else {
            return Ok(None);
        };
        for key in ["as", "source", "table"] {
            if section.field(key)?.is_none() {
                return Err(Error::invalid_definition().with_message(format!(
                    "Missing required parameter '{key}' in for_each section of {}",
                    section.document()
                )));
            }
        }
        Ok(Some(Self {
            fields: section.fields().clone(),
            document: section.document().clone(),
        }))
    }

    fn params(&self) -> Params<'_> {
        Params::new(&self.fields, &self.document)
    }

    /// Resolves the name each row is bound to.
    pub fn variable(&self, ctx: &ExecutionContext) -> Result<String> {
        self.params().required_string(ctx, "as")
    }

    /// Resolves the scanned source and table.
    pub fn target(&self, ctx: &ExecutionContext) -> Result<(String, TableAddress)> {
        let params = self.params();
        let source = params.required_string(ctx, "source")?;
        let table = params
            .table_address(ctx)?
            .ok_or_else(|| params.missing("table"))?;
        Ok((source, table))
    }

    /// Opens the scan. The caller must [`close`](RowScan::close) it on
    /// every path.
    pub async fn open(&self, ctx: &ExecutionContext) -> Result<RowScan> {
        let variable = self.variable(ctx)?;
        let (source_name, table) = self.target(ctx)?;
        let source = ctx.project().source(&source_name)?;
        let mut connection = ctx.project().connect(&source).await?;
        if let Err(err) = connection.open_table_for_read(&table).await {
            let _ = connection.close().await;
            return Err(err);
        }

        tracing::debug!(target: TRACING_TARGET, source = %source_name, table = %table, "Scanning rows");
        Ok(RowScan {
            variable,
            connection,
            rows: 0,
        })
    }
}

/// An open row scan.
pub struct RowScan {
    variable: String,
    connection: Box<dyn Connection>,
    rows: usize,
}

impl RowScan {
    /// Name each row is bound to.
    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Pulls the next row.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        let row = self.connection.next_row().await?;
        if row.is_some() {
            self.rows += 1;
        }
        Ok(row)
    }

    /// Rows returned so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Releases the connection.
    pub async fn close(mut self) -> Result<()> {
        tracing::debug!(target: TRACING_TARGET, rows = self.rows, "Scan closed");
        self.connection.close().await
    }
}

impl std::fmt::Debug for RowScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowScan")
            .field("variable", &self.variable)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rill_core::ErrorKind;
    use serde_json::json;

    use super::*;
    use crate::test_support::{context_with, memory_project};

    fn for_each(value: Value) -> Result<Option<ForEach>> {
        let fields = json!({"op": "x", "for_each": value});
        let document = Document::new("flows/a.yaml");
        ForEach::parse(&Params::new(fields.as_object().unwrap(), &document))
    }

    #[tokio::test]
    async fn test_scan_rows() {
        let project = memory_project();
        let store = project.store().clone();
        store.insert_table(
            TableAddress::new("ids"),
            vec![Row::try_from(json!({"id": 1})).unwrap(), Row::try_from(json!({"id": 2})).unwrap()],
        );
        let ctx = context_with(Arc::new(project));

        let each = for_each(json!({"as": "item", "source": "memory", "table": "ids"}))
            .unwrap()
            .unwrap();
        let mut scan = each.open(&ctx).await.unwrap();
        assert_eq!(scan.variable(), "item");
        assert_eq!(store.open_connections(), 1);
        let mut ids = Vec::new();
        while let Some(row) = scan.next().await.unwrap() {
            ids.push(row.get("id").cloned().unwrap());
        }
        assert_eq!(ids, vec![json!(1), json!(2)]);
        assert_eq!(scan.rows(), 2);
        scan.close().await.unwrap();
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_missing_table_closes_connection() {
        let project = memory_project();
        let store = project.store().clone();
        let ctx = context_with(Arc::new(project));
        let each = for_each(json!({"as": "item", "source": "memory", "table": "nope"}))
            .unwrap()
            .unwrap();
        let err = each.open(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(store.open_connections(), 0);
    }

    #[test]
    fn test_parse() {
        assert!(for_each(Value::Null).unwrap().is_none());
        let err = for_each(json!({"source": "memory", "table": "ids"})).unwrap_err();
        assert!(err.message().contains("'as'"));
    }
}
