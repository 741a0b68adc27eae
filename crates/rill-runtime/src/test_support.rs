//! Fixtures shared by unit tests.

use std::sync::Arc;

use serde_json::Value;

use crate::context::ExecutionContext;
use crate::eval::{Document, Sandbox};
use crate::job::JobHandle;
use crate::op::{FlowDefinition, OpDefinition, OpRegistry};
use crate::project::{MemoryProject, Project};

/// A project named `test` with a source named `memory`.
pub fn memory_project() -> MemoryProject {
    MemoryProject::new("test").with_memory_source("memory")
}

/// Root context of a fresh job on [`memory_project`].
pub fn context() -> ExecutionContext {
    context_with(Arc::new(memory_project()))
}

/// Root context of a fresh job on `project`.
pub fn context_with(project: Arc<dyn Project>) -> ExecutionContext {
    let handle = JobHandle::new(project, Arc::new(OpRegistry::with_builtins()), Sandbox::default());
    ExecutionContext::new(handle)
}

pub fn definition(value: Value) -> OpDefinition {
    OpDefinition::from_value(value, Document::new("flows/test.yaml")).unwrap()
}

pub fn flow_definition(name: &str, steps: Vec<Value>) -> FlowDefinition {
    let document = Document::new(format!("flows/{name}.yaml"));
    FlowDefinition {
        name: name.to_owned(),
        description: None,
        steps: steps
            .into_iter()
            .map(|step| OpDefinition::from_value(step, document.clone()).unwrap())
            .collect(),
    }
}
