//! Projects stored as a directory of YAML files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rill_core::{Connection, Error, Result};
use rill_runtime::eval::Document;
use rill_runtime::op::{FlowDefinition, OpDefinition};
use rill_runtime::project::{MEMORY_SOURCE_KIND, MemoryStore, Project, SourceDefinition};
use serde_json::{Map, Value};

use crate::jsonl::{JSONL_SOURCE_KIND, JsonlConnection};
use crate::manifest::ProjectManifest;

const TRACING_TARGET: &str = "rill_project::fs";

/// Directory holding one YAML file per flow.
pub const FLOWS_DIR: &str = "flows";
/// Directory holding one YAML file per source.
pub const SOURCES_DIR: &str = "sources";

/// Source type read by the `http_request` op. It has no tables.
const HTTP_SOURCE_KIND: &str = "http";

/// A project rooted at a directory.
///
/// Flow and source files are read every time they are requested.
#[derive(Debug, Clone)]
pub struct FsProject {
    root: PathBuf,
    manifest: ProjectManifest,
    store: MemoryStore,
}

impl FsProject {
    /// Opens the project at `root`, reading its manifest.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let manifest = ProjectManifest::read(&root)?;
        tracing::info!(
            target: TRACING_TARGET,
            project = %manifest.name,
            version = manifest.version.as_deref().unwrap_or("-"),
            root = %root.display(),
            "Project opened"
        );
        Ok(Self {
            root,
            manifest,
            store: MemoryStore::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &ProjectManifest {
        &self.manifest
    }

    /// Store backing the project's `memory` sources.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Reads `<dir>/<name>.yaml` as a mapping.
    fn read_document(&self, dir: &str, kind: &str, name: &str) -> Result<(Map<String, Value>, Document)> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(Error::invalid_definition().with_message(format!("Invalid {kind} name '{name}'")));
        }

        let relative = format!("{dir}/{name}.yaml");
        let path = self.root.join(dir).join(format!("{name}.yaml"));
        let text = std::fs::read_to_string(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::not_found().with_message(format!("{kind} '{name}' not found in project '{}'", self.manifest.name))
            } else {
                Error::connector()
                    .with_message(format!("Failed to read {}", path.display()))
                    .with_source(err)
            }
        })?;

        let value: Value = serde_yaml::from_str(&text).map_err(|err| {
            Error::invalid_definition()
                .with_message(format!("Invalid YAML in {relative}: {err}"))
                .with_source(err)
        })?;
        let document = Document::new(relative).with_text(text);
        match value {
            Value::Object(fields) => Ok((fields, document)),
            Value::Null => Ok((Map::new(), document)),
            other => Err(Error::invalid_definition()
                .with_message(format!("{document} must contain a mapping, got: {other}"))),
        }
    }

    fn jsonl_root(&self, source: &SourceDefinition) -> Result<PathBuf> {
        match source.fields.get("path") {
            Some(Value::String(path)) => Ok(self.root.join(path)),
            Some(other) => Err(Error::invalid_definition()
                .with_message(format!("'path' in {} must be a string, got: {other}", source.document))),
            None => Err(source.params().missing("path")),
        }
    }
}

/// Returns the 1-based line of each item of the top-level block `steps` list.
///
/// Flow-style lists (`steps: [...]`) yield no lines.
fn step_lines(text: &str) -> Vec<usize> {
    let mut lines = text.lines().enumerate();
    if !lines.any(|(_, line)| line.trim_end() == "steps:") {
        return Vec::new();
    }

    let mut starts = Vec::new();
    let mut item_indent = None;
    for (index, line) in lines {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();
        let is_item = trimmed == "-" || trimmed.starts_with("- ");
        match item_indent {
            // Any other top-level key ends the list.
            _ if indent == 0 && !is_item => break,
            None if is_item => {
                item_indent = Some(indent);
                starts.push(index + 1);
            }
            Some(expected) if is_item && indent == expected => starts.push(index + 1),
            _ => {}
        }
    }
    starts
}

#[async_trait]
impl Project for FsProject {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn flow_names(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.root.join(FLOWS_DIR)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "yaml"))
            .filter_map(|path| path.file_stem().and_then(|stem| stem.to_str()).map(str::to_owned))
            .collect();
        names.sort();
        names
    }

    fn flow(&self, name: &str) -> Result<FlowDefinition> {
        let (mut fields, document) = self.read_document(FLOWS_DIR, "Flow", name)?;
        let description = match fields.remove("description") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text),
            Some(other) => Some(other.to_string()),
        };
        let steps = match fields.remove("steps") {
            Some(Value::Array(steps)) => steps,
            Some(other) => {
                return Err(Error::invalid_definition()
                    .with_message(format!("'steps' in {document} must be a list, got: {other}")));
            }
            None => {
                return Err(Error::invalid_definition()
                    .with_message(format!("Missing required parameter 'steps' in {document}")));
            }
        };
        let starts = document.text().map(step_lines).unwrap_or_default();
        let starts = (starts.len() == steps.len()).then_some(starts);
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| {
                let document = match &starts {
                    Some(starts) => document.clone().starting_at(starts[index]),
                    None => document.clone(),
                };
                OpDefinition::from_value(step, document)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FlowDefinition {
            name: name.to_owned(),
            description,
            steps,
        })
    }

    fn source(&self, name: &str) -> Result<SourceDefinition> {
        let (mut fields, document) = self.read_document(SOURCES_DIR, "Source", name)?;
        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            Some(other) => {
                return Err(Error::invalid_definition()
                    .with_message(format!("'type' in {document} must be a string, got: {other}")));
            }
            None => {
                return Err(Error::invalid_definition()
                    .with_message(format!("Missing required parameter 'type' in {document}")));
            }
        };
        Ok(SourceDefinition {
            name: name.to_owned(),
            kind,
            fields,
            document,
        })
    }

    async fn connect(&self, source: &SourceDefinition) -> Result<Box<dyn Connection>> {
        tracing::debug!(target: TRACING_TARGET, source = %source.name, kind = %source.kind, "Connecting");
        match source.kind.as_str() {
            MEMORY_SOURCE_KIND => Ok(Box::new(self.store.connect())),
            JSONL_SOURCE_KIND => Ok(Box::new(JsonlConnection::open(self.jsonl_root(source)?).await?)),
            HTTP_SOURCE_KIND => Err(Error::invalid_definition().with_message(format!(
                "Source '{}' is an http source and has no tables",
                source.name
            ))),
            other => Err(Error::invalid_definition()
                .with_message(format!("Unknown source type '{other}' in {}", source.document))),
        }
    }
}
