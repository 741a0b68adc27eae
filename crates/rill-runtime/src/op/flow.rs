//! Flows: ordered step lists.

use std::sync::Arc;

use rill_core::{Error, Result};
use strum::{AsRefStr, Display};

use super::{Op, OpDefinition, OpOptions, OpRegistry};
use crate::context::{ExecutionContext, FlowPosition};

/// Type of a flow, used to label trace frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FlowKind {
    /// A named flow loaded from the project.
    Flow,
    /// An unnamed inline step list.
    Block,
}

impl FlowKind {
    /// Human label for one step of this kind of flow.
    pub const fn step_label(self) -> &'static str {
        match self {
            Self::Flow => "step",
            Self::Block => "op",
        }
    }
}

/// Unbuilt flow as read from a project.
#[derive(Debug, Clone)]
pub struct FlowDefinition {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<OpDefinition>,
}

/// A built, runnable step list.
#[derive(Debug)]
pub struct Flow {
    kind: FlowKind,
    name: Option<String>,
    description: Option<String>,
    steps: Vec<Arc<dyn Op>>,
}

impl Flow {
    /// Builds every step of a named flow.
    pub fn build(definition: FlowDefinition, registry: &OpRegistry) -> Result<Self> {
        let steps = definition
            .steps
            .into_iter()
            .map(|step| registry.build(step))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            kind: FlowKind::Flow,
            name: Some(definition.name),
            description: definition.description,
            steps,
        })
    }

    /// Builds an unnamed block.
    pub fn block(steps: &[OpDefinition], registry: &OpRegistry) -> Result<Self> {
        let steps = steps
            .iter()
            .map(|step| registry.build(step.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            kind: FlowKind::Block,
            name: None,
            description: None,
            steps,
        })
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn steps(&self) -> &[Arc<dyn Op>] {
        &self.steps
    }

    /// Finds a top-level step by id, returning its index.
    pub fn op_by_id(&self, id: &str) -> Option<(usize, Arc<dyn Op>)> {
        self.steps
            .iter()
            .position(|step| step.definition().id() == Some(id))
            .map(|index| (index, self.steps[index].clone()))
    }

    /// Position of a step of this flow.
    pub fn position(&self, index: usize) -> FlowPosition {
        FlowPosition::step(self.kind, self.name.clone(), index)
    }

    /// Runs the steps from `start_step` on, in order, in `ctx`.
    ///
    /// Stops at the first failure. The context's position is restored
    /// afterwards.
    pub async fn run(&self, ctx: &mut ExecutionContext, start_step: usize, options: &OpOptions) -> Result<()> {
        if start_step > self.steps.len() {
            return Err(Error::invalid_definition().with_message(format!(
                "start_step {start_step} is out of range for {} with {} steps",
                self.describe(),
                self.steps.len()
            )));
        }

        let job = ctx.job().clone();
        let saved = ctx.position().clone();
        let mut result = Ok(());
        for (index, step) in self.steps.iter().enumerate().skip(start_step) {
            ctx.set_position(self.position(index));
            result = job.run(ctx, step.as_ref(), options).await;
            if result.is_err() {
                break;
            }
        }
        ctx.set_position(saved);
        result
    }

    fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("{} '{name}'", self.kind),
            None => self.kind.to_string(),
        }
    }
}
