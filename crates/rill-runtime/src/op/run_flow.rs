//! `run_flow` op.

use async_trait::async_trait;
use rill_core::{Error, Result};
use serde_json::{Map, Value, json};

use super::{Flow, Op, OpDefinition, OpOptions};
use crate::context::ExecutionContext;
use crate::eval::{Document, Field, RenderOptions};
use crate::variable::Scope;

/// Runs a named flow of the project in a forked context.
///
/// `parameters` are bound as local variables of the callee, which starts at
/// `start_step` (0-based).
#[derive(Debug)]
pub struct RunFlowOp {
    definition: OpDefinition,
    start_step: Option<Field>,
    parameters: Option<Field>,
}

impl RunFlowOp {
    pub fn new(definition: OpDefinition) -> Result<Self> {
        definition.required("flow")?;
        let start_step = definition.field("start_step")?;
        let parameters = definition.field("parameters")?;
        Ok(Self {
            definition,
            start_step,
            parameters,
        })
    }

    /// Root op that runs a flow by name.
    pub fn for_flow(name: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("op".into(), json!("run_flow"));
        fields.insert("flow".into(), json!(name));
        Self {
            definition: OpDefinition {
                op: "run_flow".into(),
                fields,
                document: Document::new("<command line>"),
            },
            start_step: None,
            parameters: None,
        }
    }

    fn start_step(&self, ctx: &ExecutionContext) -> Result<usize> {
        let Some(field) = &self.start_step else {
            return Ok(0);
        };
        let value = field.resolve(ctx, RenderOptions::NULL_LITERAL)?;
        match &value {
            Value::Null => Some(0),
            Value::Number(number) => number.as_u64().and_then(|step| usize::try_from(step).ok()),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            Error::invalid_definition()
                .with_message(format!("start_step must be a non-negative integer, got: {value}"))
        })
    }

    fn parameters(&self, ctx: &ExecutionContext) -> Result<Map<String, Value>> {
        let Some(field) = &self.parameters else {
            return Ok(Map::new());
        };
        match field.resolve(ctx, RenderOptions::NULL_LITERAL)? {
            Value::Null => Ok(Map::new()),
            Value::Object(parameters) => Ok(parameters),
            other => Err(Error::invalid_definition()
                .with_message(format!("parameters must be a mapping, got: {other}"))),
        }
    }
}

#[async_trait]
impl Op for RunFlowOp {
    fn definition(&self) -> &OpDefinition {
        &self.definition
    }

    fn title(&self) -> String {
        let flow = self.definition.fields().get("flow").and_then(Value::as_str);
        self.definition.title(flow)
    }

    async fn run(&self, ctx: &mut ExecutionContext, options: &OpOptions) -> Result<()> {
        let name = self.definition.params().required_string(ctx, "flow")?;
        let start_step = self.start_step(ctx)?;
        let parameters = self.parameters(ctx)?;

        let definition = ctx.project().flow(&name)?;
        let flow = Flow::build(definition, ctx.job().registry())?;

        let mut callee = ctx.fork();
        for (key, value) in parameters {
            callee.set_variable(key, value, Scope::Local);
        }
        flow.run(&mut callee, start_step, options).await
    }
}
