//! `print` op.

use async_trait::async_trait;
use rill_core::Result;
use serde_json::Value;

use super::{Op, OpDefinition, OpOptions};
use crate::context::ExecutionContext;
use crate::eval::{Field, RenderOptions};

const TRACING_TARGET: &str = "rill_runtime::op::print";

/// Logs a rendered message.
#[derive(Debug)]
pub struct PrintOp {
    definition: OpDefinition,
    message: Field,
}

impl PrintOp {
    pub fn new(definition: OpDefinition) -> Result<Self> {
        let message = definition.required("message")?;
        Ok(Self { definition, message })
    }
}

#[async_trait]
impl Op for PrintOp {
    fn definition(&self) -> &OpDefinition {
        &self.definition
    }

    async fn run(&self, ctx: &mut ExecutionContext, _options: &OpOptions) -> Result<()> {
        let message = match self.message.resolve(ctx, RenderOptions::default())? {
            Value::String(text) => text,
            other => other.to_string(),
        };
        tracing::info!(target: TRACING_TARGET, "Message: {message}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rill_core::ErrorKind;
    use serde_json::json;

    use super::*;
    use crate::test_support::{context, definition};
    use crate::variable::Scope;

    #[tokio::test]
    async fn test_print_renders_message() {
        let mut ctx = context();
        ctx.set_variable("name", json!("world"), Scope::Project);
        let op = PrintOp::new(definition(json!({"op": "print", "message": "hello {{ var('name') }}"}))).unwrap();
        op.run(&mut ctx, &OpOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_print_requires_message() {
        let err = PrintOp::new(definition(json!({"op": "print"}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
    }
}
