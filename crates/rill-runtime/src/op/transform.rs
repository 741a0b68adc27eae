//! `transform` op.

use async_trait::async_trait;
use rill_core::{Result, TableAddress};
use serde_json::Value;

use super::{Op, OpDefinition, OpOptions};
use crate::context::ExecutionContext;

const TRACING_TARGET: &str = "rill_runtime::op::transform";

/// Materializes a query into a table of the same source.
///
/// The target is dropped first, then created with
/// `CREATE TABLE <target> AS <query>`.
#[derive(Debug)]
pub struct TransformOp {
    definition: OpDefinition,
}

impl TransformOp {
    pub fn new(definition: OpDefinition) -> Result<Self> {
        let params = definition.params();
        for key in ["source", "query", "target_table"] {
            if params.field(key)?.is_none() {
                return Err(params.missing(key));
            }
        }
        Ok(Self { definition })
    }

    fn target_table(&self, ctx: &ExecutionContext) -> Result<TableAddress> {
        let params = self.definition.params();
        match params.get("target_table") {
            Some(Value::Object(_)) => params
                .required_section("target_table")?
                .table_address(ctx)?
                .ok_or_else(|| params.missing("target_table.table")),
            _ => TableAddress::parse(&params.required_string(ctx, "target_table")?),
        }
    }
}

#[async_trait]
impl Op for TransformOp {
    fn definition(&self) -> &OpDefinition {
        &self.definition
    }

    async fn run(&self, ctx: &mut ExecutionContext, _options: &OpOptions) -> Result<()> {
        let params = self.definition.params();
        let source_name = params.required_string(ctx, "source")?;
        let query = params.required_string(ctx, "query")?;
        let target = self.target_table(ctx)?;

        let source = ctx.project().source(&source_name)?;
        let mut connection = ctx.project().connect(&source).await?;
        let result = async {
            connection.drop_table_if_exists(&target).await?;
            let statement = connection.create_table_as(&query, &target);
            tracing::debug!(target: TRACING_TARGET, source = %source_name, "{statement}");
            connection.execute_update(&statement).await
        }
        .await;
        let closed = connection.close().await;
        result.and(closed)
    }
}
