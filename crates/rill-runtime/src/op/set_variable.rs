//! `set_variable` op.

use async_trait::async_trait;
use rill_core::Result;
use serde_json::Value;

use super::{Op, OpDefinition, OpOptions};
use crate::context::ExecutionContext;
use crate::eval::{Field, RenderOptions};
use crate::variable::Scope;

const TRACING_TARGET: &str = "rill_runtime::op::set_variable";

/// Binds a variable, in project scope unless `scope: local` is given.
#[derive(Debug)]
pub struct SetVariableOp {
    definition: OpDefinition,
    value: Field,
    scope: Option<Field>,
}

impl SetVariableOp {
    pub fn new(definition: OpDefinition) -> Result<Self> {
        definition.required("name")?;
        let value = definition.required("value")?;
        let scope = definition.field("scope")?;
        Ok(Self {
            definition,
            value,
            scope,
        })
    }
}

#[async_trait]
impl Op for SetVariableOp {
    fn definition(&self) -> &OpDefinition {
        &self.definition
    }

    fn title(&self) -> String {
        let name = self.definition.fields().get("name").and_then(Value::as_str);
        self.definition.title(name)
    }

    async fn run(&self, ctx: &mut ExecutionContext, _options: &OpOptions) -> Result<()> {
        let params = self.definition.params();
        let name = params.required_string(ctx, "name")?;
        let value = self.value.resolve(ctx, RenderOptions::NULL_LITERAL)?;
        let scope = match &self.scope {
            None => Scope::default(),
            Some(field) => Scope::from_value(&field.resolve(ctx, RenderOptions::default())?)?,
        };

        tracing::info!(target: TRACING_TARGET, %scope, "Setting variable: {name}");
        tracing::debug!(target: TRACING_TARGET, "Variable {name} set to: {value}");
        ctx.set_variable(name, value, scope);
        Ok(())
    }
}
