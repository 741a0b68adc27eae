//! Operations.
//!
//! An [`Op`] is one declaratively configured unit of work. Ops are built
//! from an [`OpDefinition`] by the factory registered for their `op` name in
//! the [`OpRegistry`] and run by the job runner with a mutable
//! [`ExecutionContext`].

mod block;
mod flow;
mod for_each;
mod params;
mod print;
mod registry;
mod run_flow;
mod set_variable;
mod transform;

use std::fmt;

use async_trait::async_trait;
use rill_core::{Error, Result};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

pub use self::block::BlockOp;
pub use self::flow::{Flow, FlowDefinition, FlowKind};
pub use self::for_each::{ForEach, RowScan};
pub use self::params::Params;
pub use self::print::PrintOp;
pub use self::registry::{OpFactory, OpRegistry};
pub use self::run_flow::RunFlowOp;
pub use self::set_variable::SetVariableOp;
pub use self::transform::TransformOp;
use crate::context::ExecutionContext;
use crate::eval::{Document, Field};

/// Debug mode that previews a single request instead of running the op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum PreviewMode {
    /// Logs the raw request and response.
    PreviewTrace,
    /// Logs the request and a pretty-printed response body.
    PreviewPretty,
}

/// Options passed to [`Op::run`] by debug entry points.
#[derive(Debug, Clone, Default)]
pub struct OpOptions {
    /// Literal row bound to the `for_each` variable instead of scanning.
    pub foreach_record: Option<Value>,
    /// Preview one request without parsing or loading results.
    pub preview: Option<PreviewMode>,
}

impl OpOptions {
    /// Returns true if any debug option is set.
    pub fn is_debug(&self) -> bool {
        self.foreach_record.is_some() || self.preview.is_some()
    }
}

/// A unit of pipeline work.
#[async_trait]
pub trait Op: Send + Sync + fmt::Debug {
    /// Returns the unevaluated definition the op was built from.
    fn definition(&self) -> &OpDefinition;

    /// Returns the title used in logs and traces.
    fn title(&self) -> String {
        self.definition().title(None)
    }

    /// Runs the op.
    async fn run(&self, ctx: &mut ExecutionContext, options: &OpOptions) -> Result<()>;
}

/// The raw field map of one step.
#[derive(Debug, Clone)]
pub struct OpDefinition {
    op: String,
    fields: Map<String, Value>,
    document: Document,
}

impl OpDefinition {
    /// Validates that the mapping names its op.
    pub fn new(fields: Map<String, Value>, document: Document) -> Result<Self> {
        let op = match fields.get("op") {
            Some(Value::String(op)) => op.clone(),
            Some(other) => {
                return Err(Error::invalid_definition()
                    .with_message(format!("'op' in {document} must be a string, got: {other}")));
            }
            None => {
                return Err(Error::invalid_definition()
                    .with_message(format!("A step in {document} is missing the 'op' key")));
            }
        };
        Ok(Self { op, fields, document })
    }

    /// Validates a step given as an arbitrary value.
    pub fn from_value(value: Value, document: Document) -> Result<Self> {
        match value {
            Value::Object(fields) => Self::new(fields, document),
            other => Err(Error::invalid_definition()
                .with_message(format!("A step in {document} must be a mapping, got: {other}"))),
        }
    }

    /// Returns the op name (its type).
    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn id(&self) -> Option<&str> {
        self.fields.get("id").and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn params(&self) -> Params<'_> {
        Params::new(&self.fields, &self.document)
    }

    /// Reads an optional top-level field.
    pub fn field(&self, key: &str) -> Result<Option<Field>> {
        self.params().field(key)
    }

    /// Reads a required top-level field.
    pub fn required(&self, key: &str) -> Result<Field> {
        self.params().required(key)
    }

    /// Title from `id`, then `title`, then `fallback`.
    pub fn title(&self, fallback: Option<&str>) -> String {
        let name = self
            .id()
            .or_else(|| self.fields.get("title").and_then(Value::as_str))
            .or(fallback)
            .unwrap_or("unknown");
        format!("{}: {name}", self.op)
    }
}
