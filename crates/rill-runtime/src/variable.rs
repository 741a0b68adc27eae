//! Variable bindings and scopes.
//!
//! A run keeps two kinds of bindings: the local scope owned by a single
//! [`ExecutionContext`] and the project scope owned by the job, shared by
//! every context forked from it.
//!
//! [`ExecutionContext`]: crate::ExecutionContext

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rill_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

/// Visibility class of a variable.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Scope {
    /// Bound to one context; dies with it.
    Local,
    /// Bound to the job; visible across every forked context.
    #[default]
    Project,
}

impl Scope {
    /// Parses a scope given in a definition; null means the default scope.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::String(text) => text.parse().map_err(|_| {
                Error::invalid_definition().with_message(format!(
                    "Invalid variable scope '{text}': expected 'local' or 'project'"
                ))
            }),
            other => Err(Error::invalid_definition()
                .with_message(format!("Variable scope must be a string, got: {other}"))),
        }
    }
}

/// Type tag recorded alongside a bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum VariableKind {
    Null,
    Boolean,
    Number,
    Text,
    List,
    Map,
}

impl VariableKind {
    /// Infers the kind of a JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::Text,
            Value::Array(_) => Self::List,
            Value::Object(_) => Self::Map,
        }
    }
}

/// A bound value with its type tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub kind: VariableKind,
    pub value: Value,
}

impl Variable {
    /// Wraps a value, inferring its kind.
    pub fn new(value: Value) -> Self {
        Self {
            kind: VariableKind::of(&value),
            value,
        }
    }
}

/// A mapping from variable name to typed value within one scope.
#[derive(Debug, Clone, Default)]
pub struct VariableBindings {
    bindings: HashMap<String, Variable>,
}

impl VariableBindings {
    /// Creates an empty set of bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `value`, replacing any previous binding.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), Variable::new(value));
    }

    /// Returns the binding for `name`.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.bindings.get(name)
    }

    /// Returns the value bound to `name`.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name).map(|variable| &variable.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Removes a binding, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name).map(|variable| variable.value)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Project-scope bindings shared between every context of a job.
///
/// Execution is single-threaded; the lock only makes the handle `Send`
/// and `Sync` so it can cross `.await` points and be captured by template
/// functions.
#[derive(Clone, Default)]
pub struct SharedBindings {
    inner: Arc<RwLock<VariableBindings>>,
}

impl SharedBindings {
    /// Creates an empty shared store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `value`.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.write().set(name, value);
    }

    /// Returns a copy of the value bound to `name`.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.read().value(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns true if both handles point at the same store.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, VariableBindings> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VariableBindings> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SharedBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBindings")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Read-only view over a context's variables, local scope first.
///
/// Handed to the template renderer and the sandbox so that user code can
/// look variables up without borrowing the context.
#[derive(Debug, Clone)]
pub struct VariableView {
    locals: Arc<VariableBindings>,
    project: SharedBindings,
}

impl VariableView {
    pub(crate) fn new(locals: VariableBindings, project: SharedBindings) -> Self {
        Self {
            locals: Arc::new(locals),
            project,
        }
    }

    /// Looks a variable up, local scope first.
    pub fn get(&self, name: &str) -> Option<Value> {
        match self.locals.value(name) {
            Some(value) => Some(value.clone()),
            None => self.project.get(name),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.locals.contains(name) || self.project.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_scope_parsing() {
        assert_eq!("local".parse::<Scope>().unwrap(), Scope::Local);
        assert_eq!("project".parse::<Scope>().unwrap(), Scope::Project);
        assert!("global".parse::<Scope>().is_err());
        assert_eq!(Scope::default(), Scope::Project);
    }

    #[test]
    fn test_bindings_record_kind() {
        let mut bindings = VariableBindings::new();
        bindings.set("n", json!(3));
        bindings.set("tags", json!(["a"]));
        assert_eq!(bindings.get("n").unwrap().kind, VariableKind::Number);
        assert_eq!(bindings.get("tags").unwrap().kind, VariableKind::List);
        assert_eq!(bindings.remove("n"), Some(json!(3)));
        assert!(!bindings.contains("n"));
    }

    #[test]
    fn test_shared_bindings_are_shared() {
        let shared = SharedBindings::new();
        let other = shared.clone();
        other.set("cursor", json!("abc"));
        assert_eq!(shared.get("cursor"), Some(json!("abc")));
        assert!(shared.ptr_eq(&other));
    }

    #[test]
    fn test_view_prefers_locals() {
        let project = SharedBindings::new();
        project.set("x", json!("project"));
        project.set("y", json!("project"));
        let mut locals = VariableBindings::new();
        locals.set("x", json!("local"));

        let view = VariableView::new(locals, project);
        assert_eq!(view.get("x"), Some(json!("local")));
        assert_eq!(view.get("y"), Some(json!("project")));
        assert!(!view.contains("z"));
    }
}
