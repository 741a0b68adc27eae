//! Project contract.
//!
//! A project supplies flow and source definitions and opens connections to
//! table-bearing sources. [`MemoryProject`] keeps everything in process.

mod memory;

use std::fmt;

use async_trait::async_trait;
use rill_core::{Connection, Result};
use serde_json::{Map, Value};

pub use self::memory::{MEMORY_SOURCE_KIND, MemoryConnection, MemoryProject, MemoryStore};
use crate::eval::Document;
use crate::op::{FlowDefinition, Params};

/// A named source definition.
#[derive(Debug, Clone)]
pub struct SourceDefinition {
    pub name: String,
    /// Source type, such as `http` or `memory`.
    pub kind: String,
    /// Type-specific fields, unrendered.
    pub fields: Map<String, Value>,
    pub document: Document,
}

impl SourceDefinition {
    pub fn params(&self) -> Params<'_> {
        Params::new(&self.fields, &self.document)
    }
}

/// Supplies definitions and connections to a job.
#[async_trait]
pub trait Project: Send + Sync + fmt::Debug {
    /// Returns the project name.
    fn name(&self) -> &str;

    /// Returns the names of all flows, sorted.
    fn flow_names(&self) -> Vec<String>;

    /// Loads a flow definition; fails with a not-found error if absent.
    fn flow(&self, name: &str) -> Result<FlowDefinition>;

    /// Loads a source definition; fails with a not-found error if absent.
    fn source(&self, name: &str) -> Result<SourceDefinition>;

    /// Opens a connection to a table-bearing source.
    async fn connect(&self, source: &SourceDefinition) -> Result<Box<dyn Connection>>;
}
