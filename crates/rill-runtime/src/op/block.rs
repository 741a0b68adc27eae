//! `block` op.

use async_trait::async_trait;
use rill_core::{Error, Result};
use serde_json::Value;

use super::{Flow, Op, OpDefinition, OpOptions};
use crate::context::ExecutionContext;

/// Runs an inline list of steps as an unnamed flow of kind `block`.
///
/// The steps run in the caller's context, so they see and set the same
/// local variables.
#[derive(Debug)]
pub struct BlockOp {
    definition: OpDefinition,
    steps: Vec<OpDefinition>,
}

impl BlockOp {
    pub fn new(definition: OpDefinition) -> Result<Self> {
        let steps = match definition.fields().get("steps") {
            Some(Value::Array(steps)) => steps
                .iter()
                .map(|step| OpDefinition::from_value(step.clone(), definition.document().clone()))
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(Error::invalid_definition().with_message(format!(
                    "'steps' in {} must be a list, got: {other}",
                    definition.document()
                )));
            }
            None => return Err(definition.params().missing("steps")),
        };
        Ok(Self { definition, steps })
    }
}

#[async_trait]
impl Op for BlockOp {
    fn definition(&self) -> &OpDefinition {
        &self.definition
    }

    async fn run(&self, ctx: &mut ExecutionContext, options: &OpOptions) -> Result<()> {
        let flow = Flow::block(&self.steps, ctx.job().registry())?;
        flow.run(ctx, 0, options).await
    }
}
