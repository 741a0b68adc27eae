//! Job runner.
//!
//! A [`Job`] is one top-level run: a root op, the execution stack and the
//! project-scope variables. Every op invocation goes through
//! [`JobHandle::run`], which keeps the stack balanced and attaches the
//! aggregated trace to the first error it sees.

mod stack;

use std::fmt;
use std::sync::Arc;

use rill_core::{Error, Result};
use uuid::Uuid;

pub use self::stack::{ExecutionStack, StackEntry};
use crate::context::{ExecutionContext, FlowPosition};
use crate::eval::Sandbox;
use crate::op::{Op, OpOptions, OpRegistry};
use crate::project::Project;
use crate::variable::SharedBindings;

/// Tracing target for job execution.
const TRACING_TARGET: &str = "rill_runtime::job";

/// Outcome of a job that did not fail internally.
#[derive(Debug)]
pub enum JobStatus {
    Succeeded,
    /// The run stopped on a user error, which has been reported.
    Failed(Error),
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Shared state of a running job, cheap to clone.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobInner>,
}

struct JobInner {
    id: Uuid,
    project: Arc<dyn Project>,
    registry: Arc<OpRegistry>,
    sandbox: Sandbox,
    variables: SharedBindings,
    stack: ExecutionStack,
}

impl JobHandle {
    /// Creates the state of a new job.
    pub fn new(project: Arc<dyn Project>, registry: Arc<OpRegistry>, sandbox: Sandbox) -> Self {
        Self {
            inner: Arc::new(JobInner {
                id: Uuid::now_v7(),
                project,
                registry,
                sandbox,
                variables: SharedBindings::new(),
                stack: ExecutionStack::default(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn project(&self) -> &Arc<dyn Project> {
        &self.inner.project
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.inner.registry
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.inner.sandbox
    }

    /// Returns the project-scope variables.
    pub fn variables(&self) -> &SharedBindings {
        &self.inner.variables
    }

    pub fn stack(&self) -> &ExecutionStack {
        &self.inner.stack
    }

    /// Runs one op inside a new stack frame.
    ///
    /// The frame is derived from the op title and the context's position,
    /// made the context's active entry for the duration of the call, then
    /// removed again whether the op succeeds or fails. An error leaving the
    /// op without a trace gets the trace of the whole stack at that moment.
    pub async fn run(&self, ctx: &mut ExecutionContext, op: &dyn Op, options: &OpOptions) -> Result<()> {
        let title = op.title();
        let entry = Arc::new(StackEntry::new(
            title.clone(),
            ctx.position().clone(),
            ctx.active_entry().cloned(),
        ));
        let frame = FrameGuard::push(&self.inner.stack, entry.clone());
        let previous = ctx.replace_active_entry(Some(entry.clone()));

        tracing::info!(
            target: TRACING_TARGET,
            job_id = %self.inner.id,
            depth = entry.depth(),
            "Starting \"{title}\""
        );

        let result = op.run(ctx, options).await;
        ctx.replace_active_entry(previous);

        let result = match result {
            Ok(()) => {
                tracing::info!(
                    target: TRACING_TARGET,
                    job_id = %self.inner.id,
                    elapsed_ms = entry.elapsed_ms(),
                    "Finished \"{title}\""
                );
                Ok(())
            }
            Err(err) if err.trace().is_none() => Err(err.with_trace(self.inner.stack.trace())),
            Err(err) => Err(err),
        };
        drop(frame);
        result
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.inner.id)
            .field("project", &self.inner.project.name())
            .field("depth", &self.inner.stack.depth())
            .finish_non_exhaustive()
    }
}

/// Pops its entry when dropped, keeping the stack balanced even if the op
/// future is abandoned.
struct FrameGuard<'a> {
    stack: &'a ExecutionStack,
}

impl<'a> FrameGuard<'a> {
    fn push(stack: &'a ExecutionStack, entry: Arc<StackEntry>) -> Self {
        stack.push(entry);
        Self { stack }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.stack.pop();
    }
}

/// One top-level run of a root op.
#[derive(Debug)]
pub struct Job {
    handle: JobHandle,
    root: Arc<dyn Op>,
    position: FlowPosition,
}

impl Job {
    pub fn new(handle: JobHandle, root: Arc<dyn Op>) -> Self {
        Self {
            handle,
            root,
            position: FlowPosition::default(),
        }
    }

    /// Runs the root as if it were a step of a flow.
    pub fn with_position(mut self, position: FlowPosition) -> Self {
        self.position = position;
        self
    }

    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub fn root(&self) -> &Arc<dyn Op> {
        &self.root
    }

    /// Runs the root op to completion.
    ///
    /// User errors are logged with their trace and returned as
    /// [`JobStatus::Failed`]. Any other error is logged and returned as
    /// `Err` for the caller to treat as fatal.
    pub async fn run(&self, options: &OpOptions) -> Result<JobStatus> {
        let mut ctx = ExecutionContext::new(self.handle.clone());
        ctx.set_position(self.position.clone());

        tracing::debug!(
            target: TRACING_TARGET,
            job_id = %self.handle.id(),
            project = self.handle.project().name(),
            "Job started"
        );

        match self.handle.run(&mut ctx, self.root.as_ref(), options).await {
            Ok(()) => {
                tracing::debug!(target: TRACING_TARGET, job_id = %self.handle.id(), "Job succeeded");
                Ok(JobStatus::Succeeded)
            }
            Err(err) if err.is_user_error() => {
                tracing::error!(
                    target: TRACING_TARGET,
                    job_id = %self.handle.id(),
                    kind = err.kind_str(),
                    "{}\n{}",
                    err.message(),
                    err.trace().map(ToString::to_string).unwrap_or_default()
                );
                Ok(JobStatus::Failed(err))
            }
            Err(err) => {
                tracing::error!(
                    target: TRACING_TARGET,
                    job_id = %self.handle.id(),
                    kind = err.kind_str(),
                    error = ?err,
                    "Internal error: {}\n{}",
                    err.message(),
                    err.trace().map(ToString::to_string).unwrap_or_default()
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rill_core::ErrorKind;
    use serde_json::json;

    use super::*;
    use crate::op::{OpDefinition, RunFlowOp};
    use crate::test_support::{definition, memory_project};

    #[derive(Debug)]
    struct Failing {
        definition: OpDefinition,
        error: fn() -> Error,
    }

    #[async_trait]
    impl Op for Failing {
        fn definition(&self) -> &OpDefinition {
            &self.definition
        }

        async fn run(&self, _ctx: &mut ExecutionContext, _options: &OpOptions) -> Result<()> {
            Err((self.error)().with_message("it broke"))
        }
    }

    fn handle() -> JobHandle {
        JobHandle::new(
            Arc::new(memory_project()),
            Arc::new(OpRegistry::with_builtins()),
            Sandbox::default(),
        )
    }

    #[tokio::test]
    async fn test_user_error_is_reported_not_raised() {
        let root = Arc::new(Failing {
            definition: definition(json!({"op": "fail", "id": "root"})),
            error: Error::invalid_definition,
        });
        let job = Job::new(handle(), root);
        match job.run(&OpOptions::default()).await.unwrap() {
            JobStatus::Failed(err) => {
                assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
                assert_eq!(err.trace().unwrap().to_string(), "fail: root");
            }
            JobStatus::Succeeded => panic!("expected failure"),
        }
        assert_eq!(job.handle().stack().depth(), 0);
    }

    #[tokio::test]
    async fn test_internal_error_is_raised() {
        let root = Arc::new(Failing {
            definition: definition(json!({"op": "fail"})),
            error: Error::internal,
        });
        let job = Job::new(handle(), root);
        let err = job.run(&OpOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.trace().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_nested_trace_is_root_to_leaf() {
        let project = memory_project().with_flow_steps(
            "main",
            vec![
                json!({"op": "print", "message": "ok"}),
                json!({"op": "block", "steps": [
                    {"op": "print", "message": "fine"},
                    {"op": "print", "id": "bad", "message": "{{ var('nope') }}"}
                ]}),
                json!({"op": "set_variable", "name": "after", "value": 1}),
            ],
        );
        let handle = JobHandle::new(
            Arc::new(project),
            Arc::new(OpRegistry::with_builtins()),
            Sandbox::default(),
        );
        let job = Job::new(handle, Arc::new(RunFlowOp::for_flow("main")));

        let JobStatus::Failed(err) = job.run(&OpOptions::default()).await.unwrap() else {
            panic!("expected failure");
        };
        let rendered = err.trace().unwrap().to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "run_flow: main",
                "  block: unknown (flow \"main\", step 2)",
                "    print: bad (block, op 2)",
            ]
        );
        assert!(job.handle().variables().get("after").is_none());
        assert_eq!(job.handle().stack().depth(), 0);
    }
}
