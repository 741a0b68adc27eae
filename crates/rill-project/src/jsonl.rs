//! Tables stored as JSON Lines files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rill_core::{Connection, Error, Result, Row, TableAddress};
use serde_json::Value;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};

const TRACING_TARGET: &str = "rill_project::jsonl";

/// Source type of JSON Lines directories.
pub const JSONL_SOURCE_KIND: &str = "jsonl";

/// A connection to a directory of `.jsonl` tables.
///
/// Table `db.ns.t` lives at `<root>/db/ns/t.jsonl`. Each line holds one row
/// as a JSON object; blank lines are skipped.
pub struct JsonlConnection {
    root: PathBuf,
    scan: Option<Scan>,
    closed: bool,
}

struct Scan {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl JsonlConnection {
    /// Opens the directory, creating it if missing.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(io_error("create directory", &root))?;
        tracing::debug!(target: TRACING_TARGET, root = %root.display(), "Connection opened");
        Ok(Self {
            root,
            scan: None,
            closed: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file holding `table`.
    pub fn table_path(&self, table: &TableAddress) -> Result<PathBuf> {
        let mut path = self.root.clone();
        let segments = [table.database.as_deref(), table.namespace.as_deref()];
        for segment in segments.into_iter().flatten() {
            path.push(checked_segment(segment)?);
        }
        path.push(format!("{}.jsonl", checked_segment(&table.table)?));
        Ok(path)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::connector().with_message("jsonl connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for JsonlConnection {
    async fn open_table_for_read(&mut self, table: &TableAddress) -> Result<()> {
        self.ensure_open()?;
        let path = self.table_path(table)?;
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::not_found().with_message(format!("Table '{table}' does not exist"))
            } else {
                io_error("open", &path)(err)
            }
        })?;
        self.scan = Some(Scan {
            path,
            lines: BufReader::new(file).lines(),
            line: 0,
        });
        Ok(())
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        self.ensure_open()?;
        let scan = self
            .scan
            .as_mut()
            .ok_or_else(|| Error::internal().with_message("next_row called without an open table"))?;

        loop {
            let Some(text) = scan.lines.next_line().await.map_err(io_error("read", &scan.path))? else {
                self.scan = None;
                return Ok(None);
            };
            scan.line += 1;
            if text.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&text).map_err(|err| {
                Error::connector()
                    .with_message(format!("Invalid JSON on line {} of {}", scan.line, scan.path.display()))
                    .with_source(err)
            })?;
            return Row::try_from(value).map(Some);
        }
    }

    async fn execute_update(&mut self, statement: &str) -> Result<()> {
        self.ensure_open()?;
        Err(Error::invalid_definition()
            .with_message(format!("jsonl sources cannot execute statements: {statement}")))
    }

    async fn drop_table_if_exists(&mut self, table: &TableAddress) -> Result<()> {
        self.ensure_open()?;
        let path = self.table_path(table)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(target: TRACING_TARGET, table = %table, "Table dropped");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error("remove", &path)(err)),
        }
    }

    async fn create_table(&mut self, table: &TableAddress, _columns: &[String]) -> Result<()> {
        self.ensure_open()?;
        let path = self.table_path(table)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error("create directory", parent))?;
        }
        File::create(&path).await.map_err(io_error("create", &path))?;
        Ok(())
    }

    async fn insert_rows(&mut self, table: &TableAddress, rows: Vec<Row>) -> Result<()> {
        self.ensure_open()?;
        let path = self.table_path(table)?;
        let mut buffer = String::new();
        for row in rows {
            buffer.push_str(&row.into_value().to_string());
            buffer.push('\n');
        }

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(io_error("open", &path))?;
        file.write_all(buffer.as_bytes())
            .await
            .map_err(io_error("write", &path))?;
        file.flush().await.map_err(io_error("write", &path))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.scan = None;
            self.closed = true;
            tracing::debug!(target: TRACING_TARGET, root = %self.root.display(), "Connection closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for JsonlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlConnection")
            .field("root", &self.root)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn checked_segment(segment: &str) -> Result<&str> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['/', '\\']) {
        return Err(Error::invalid_definition().with_message(format!("Invalid table name part '{segment}'")));
    }
    Ok(segment)
}

fn io_error<'a>(action: &'a str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Error + 'a {
    move |err| {
        Error::connector()
            .with_message(format!("Failed to {action} {}", path.display()))
            .with_source(err)
    }
}
