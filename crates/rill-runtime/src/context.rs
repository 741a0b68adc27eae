//! Per-run mutable execution state.

use std::sync::Arc;

use rill_core::{Error, Result, TraceFrame};
use serde_json::Value;

use crate::job::{JobHandle, StackEntry};
use crate::op::FlowKind;
use crate::project::Project;
use crate::variable::{Scope, VariableBindings, VariableView};

/// Where in its enclosing flow an op is running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowPosition {
    /// Type of the enclosing flow, if any.
    pub flow_kind: Option<FlowKind>,
    /// Name of the enclosing flow, if it has one.
    pub flow_name: Option<String>,
    /// 0-based index of the current step.
    pub step_index: Option<usize>,
}

impl FlowPosition {
    /// Position of a step within a flow.
    pub fn step(kind: FlowKind, name: Option<String>, index: usize) -> Self {
        Self {
            flow_kind: Some(kind),
            flow_name: name,
            step_index: Some(index),
        }
    }

    /// Renders a trace frame for an op with the given title at this position.
    pub fn frame(&self, title: impl Into<String>) -> TraceFrame {
        TraceFrame {
            title: title.into(),
            flow_type: self.flow_kind.map(|kind| kind.to_string()),
            flow_name: self.flow_name.clone(),
            step_index: self.step_index,
            step_label: self
                .flow_kind
                .map_or(FlowKind::Flow.step_label(), FlowKind::step_label)
                .to_owned(),
        }
    }
}

/// Mutable state threaded through one invocation.
///
/// A context owns its local variables and its position; project-scope
/// variables live in the job and are shared by every fork. Nested
/// invocations run on a [`fork`](Self::fork) so that locals set inside them
/// never leak to siblings or parents.
#[derive(Debug)]
pub struct ExecutionContext {
    job: JobHandle,
    locals: VariableBindings,
    position: FlowPosition,
    active_entry: Option<Arc<StackEntry>>,
}

impl ExecutionContext {
    /// Creates the root context of a job.
    pub fn new(job: JobHandle) -> Self {
        Self {
            job,
            locals: VariableBindings::new(),
            position: FlowPosition::default(),
            active_entry: None,
        }
    }

    /// Returns a context sharing this one's job and project variables,
    /// carrying a copy of its position and active entry, with an empty
    /// local scope.
    pub fn fork(&self) -> Self {
        Self {
            job: self.job.clone(),
            locals: VariableBindings::new(),
            position: self.position.clone(),
            active_entry: self.active_entry.clone(),
        }
    }

    /// Returns the owning job.
    pub fn job(&self) -> &JobHandle {
        &self.job
    }

    /// Returns the project the job runs against.
    pub fn project(&self) -> &Arc<dyn Project> {
        self.job.project()
    }

    /// Returns the value of a variable, local scope first.
    ///
    /// Fails with an undefined-variable error when neither scope binds it.
    pub fn variable(&self, name: &str) -> Result<Value> {
        self.try_variable(name).ok_or_else(|| {
            Error::undefined_variable().with_message(format!("Variable '{name}' is not defined"))
        })
    }

    /// Returns the value of a variable if it is bound.
    pub fn try_variable(&self, name: &str) -> Option<Value> {
        match self.locals.value(name) {
            Some(value) => Some(value.clone()),
            None => self.job.variables().get(name),
        }
    }

    pub fn is_variable_defined(&self, name: &str) -> bool {
        self.locals.contains(name) || self.job.variables().contains(name)
    }

    /// Binds a variable in the given scope.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value, scope: Scope) {
        match scope {
            Scope::Local => self.locals.set(name, value),
            Scope::Project => self.job.variables().set(name, value),
        }
    }

    /// Binds a variable returned by user code.
    ///
    /// A plain value goes to project scope. A mapping must carry both a
    /// `value` and a `scope` key.
    pub fn set_variable_from_definition(&mut self, name: &str, definition: Value) -> Result<Scope> {
        let (value, scope) = match definition {
            Value::Object(mut fields) => {
                let value = fields.remove("value").ok_or_else(|| {
                    Error::invalid_definition().with_message(format!(
                        "Setting variable \"{name}\" with a mapping that has no \"value\" key"
                    ))
                })?;
                let scope = match fields.get("scope") {
                    Some(Value::String(scope)) => scope.parse::<Scope>().map_err(|_| {
                        Error::invalid_definition()
                            .with_message(format!("Setting variable \"{name}\" with invalid scope: {scope}"))
                    })?,
                    Some(other) => {
                        return Err(Error::invalid_definition()
                            .with_message(format!("Setting variable \"{name}\" with invalid scope: {other}")));
                    }
                    None => {
                        return Err(Error::invalid_definition().with_message(format!(
                            "Setting variable \"{name}\" with a mapping that has no \"scope\" key"
                        )));
                    }
                };
                (value, scope)
            }
            value => (value, Scope::Project),
        };
        self.set_variable(name, value, scope);
        Ok(scope)
    }

    /// Returns the local bindings of this context.
    pub fn locals(&self) -> &VariableBindings {
        &self.locals
    }

    /// Returns a read-only snapshot of the visible variables.
    pub fn view(&self) -> VariableView {
        VariableView::new(self.locals.clone(), self.job.variables().clone())
    }

    pub fn position(&self) -> &FlowPosition {
        &self.position
    }

    pub fn set_position(&mut self, position: FlowPosition) {
        self.position = position;
    }

    /// Returns the stack entry of the op currently running in this context.
    pub fn active_entry(&self) -> Option<&Arc<StackEntry>> {
        self.active_entry.as_ref()
    }

    pub(crate) fn replace_active_entry(
        &mut self,
        entry: Option<Arc<StackEntry>>,
    ) -> Option<Arc<StackEntry>> {
        std::mem::replace(&mut self.active_entry, entry)
    }
}

#[cfg(test)]
mod tests {
    use rill_core::ErrorKind;
    use serde_json::json;

    use super::*;
    use crate::test_support::context;

    #[test]
    fn test_local_scope_does_not_survive_fork() {
        let mut ctx = context();
        ctx.set_variable("row", json!({"id": 1}), Scope::Local);
        assert_eq!(ctx.variable("row").unwrap(), json!({"id": 1}));

        let fork = ctx.fork();
        let err = fork.variable("row").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndefinedVariable);
        assert_eq!(err.message(), "Variable 'row' is not defined");
    }

    #[test]
    fn test_project_scope_is_shared_both_ways() {
        let mut ctx = context();
        ctx.set_variable("cursor", json!(10), Scope::Project);

        let mut fork = ctx.fork();
        assert_eq!(fork.variable("cursor").unwrap(), json!(10));

        fork.set_variable("cursor", json!(20), Scope::Project);
        assert_eq!(ctx.variable("cursor").unwrap(), json!(20));
    }

    #[test]
    fn test_local_shadows_project() {
        let mut ctx = context();
        ctx.set_variable("page", json!(1), Scope::Project);
        ctx.set_variable("page", json!(2), Scope::Local);
        assert_eq!(ctx.variable("page").unwrap(), json!(2));
        assert_eq!(ctx.fork().variable("page").unwrap(), json!(1));
    }

    #[test]
    fn test_variable_definitions() {
        let mut ctx = context();
        assert_eq!(ctx.set_variable_from_definition("a", json!(1)).unwrap(), Scope::Project);
        let scope = ctx
            .set_variable_from_definition("b", json!({"value": [1], "scope": "local"}))
            .unwrap();
        assert_eq!(scope, Scope::Local);
        assert_eq!(ctx.fork().variable("a").unwrap(), json!(1));
        assert!(ctx.fork().variable("b").is_err());

        for bad in [json!({"value": 1}), json!({"scope": "local"}), json!({"value": 1, "scope": "global"})] {
            let err = ctx.set_variable_from_definition("c", bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
        }
    }

    #[test]
    fn test_fork_copies_position() {
        let mut ctx = context();
        ctx.set_position(FlowPosition::step(FlowKind::Flow, Some("main".into()), 2));

        let mut fork = ctx.fork();
        assert_eq!(fork.position(), ctx.position());

        fork.set_position(FlowPosition::default());
        assert_eq!(ctx.position().step_index, Some(2));
    }

    #[test]
    fn test_position_frame() {
        let position = FlowPosition::step(FlowKind::Block, None, 0);
        let frame = position.frame("print: hello");
        assert_eq!(frame.to_string(), "print: hello (block, op 1)");
    }
}
