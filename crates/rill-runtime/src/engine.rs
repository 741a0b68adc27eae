//! Pipeline engine.

use std::sync::Arc;

use rill_core::{Error, Result};

use crate::eval::{Sandbox, SandboxConfig};
use crate::job::{Job, JobHandle};
use crate::op::{Flow, Op, OpRegistry, RunFlowOp};
use crate::project::Project;

/// Tracing target for engine operations.
const TRACING_TARGET: &str = "rill_runtime::engine";

/// Creates jobs for a project.
///
/// Holds the project, the registry of op factories and the sandbox every
/// job compiles user code on. Each job gets fresh project-scope variables.
#[derive(Debug, Clone)]
pub struct Engine {
    project: Arc<dyn Project>,
    registry: Arc<OpRegistry>,
    sandbox: Sandbox,
}

impl Engine {
    /// Creates an engine with the default sandbox limits.
    pub fn new(project: Arc<dyn Project>, registry: OpRegistry) -> Self {
        tracing::info!(
            target: TRACING_TARGET,
            project = project.name(),
            ops = ?registry.names(),
            "Engine initialized"
        );
        Self {
            project,
            registry: Arc::new(registry),
            sandbox: Sandbox::default(),
        }
    }

    /// Replaces the sandbox limits.
    pub fn with_sandbox(mut self, config: SandboxConfig) -> Self {
        self.sandbox = Sandbox::new(config);
        self
    }

    pub fn project(&self) -> &Arc<dyn Project> {
        &self.project
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    /// Creates a job running `root`.
    pub fn job(&self, root: Arc<dyn Op>) -> Job {
        let handle = JobHandle::new(self.project.clone(), self.registry.clone(), self.sandbox.clone());
        Job::new(handle, root)
    }

    /// Creates a job running a whole flow.
    ///
    /// Fails with a not-found error if the project has no such flow.
    pub fn flow_job(&self, name: &str) -> Result<Job> {
        self.project.flow(name)?;
        Ok(self.job(Arc::new(RunFlowOp::for_flow(name))))
    }

    /// Creates a job running the single top-level step of a flow whose id is
    /// `op_id`, positioned as that step of the flow.
    pub fn op_job(&self, flow: &str, op_id: &str) -> Result<Job> {
        let flow = Flow::build(self.project.flow(flow)?, &self.registry)?;
        let (index, op) = flow.op_by_id(op_id).ok_or_else(|| {
            Error::not_found().with_message(format!(
                "Op with id '{op_id}' not found in flow '{}'",
                flow.name().unwrap_or_default()
            ))
        })?;
        Ok(self.job(op).with_position(flow.position(index)))
    }
}
