//! Op registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rill_core::{Error, Result};

use super::{BlockOp, Op, OpDefinition, PrintOp, RunFlowOp, SetVariableOp, TransformOp};

/// Builds an op from its definition.
pub type OpFactory = Arc<dyn Fn(OpDefinition) -> Result<Arc<dyn Op>> + Send + Sync>;

/// Mapping from op name to factory, populated at process start.
#[derive(Clone, Default)]
pub struct OpRegistry {
    factories: HashMap<String, OpFactory>,
}

impl OpRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in ops.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("print", |def| Ok(Arc::new(PrintOp::new(def)?) as Arc<dyn Op>));
        registry.register("set_variable", |def| {
            Ok(Arc::new(SetVariableOp::new(def)?) as Arc<dyn Op>)
        });
        registry.register("transform", |def| Ok(Arc::new(TransformOp::new(def)?) as Arc<dyn Op>));
        registry.register("run_flow", |def| Ok(Arc::new(RunFlowOp::new(def)?) as Arc<dyn Op>));
        registry.register("block", |def| Ok(Arc::new(BlockOp::new(def)?) as Arc<dyn Op>));
        registry
    }

    /// Registers a factory, replacing any previous one for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(OpDefinition) -> Result<Arc<dyn Op>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Builds the op named by a definition.
    pub fn build(&self, definition: OpDefinition) -> Result<Arc<dyn Op>> {
        let factory = self.factories.get(definition.op()).ok_or_else(|| {
            Error::invalid_definition().with_message(format!(
                "Unknown op '{}' in {}",
                definition.op(),
                definition.document()
            ))
        })?;
        factory(definition)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Returns the registered op names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpRegistry")
            .field("ops", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rill_core::ErrorKind;
    use serde_json::json;

    use super::*;
    use crate::eval::Document;

    #[test]
    fn test_builtins() {
        let registry = OpRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec!["block", "print", "run_flow", "set_variable", "transform"]
        );
    }

    #[test]
    fn test_unknown_op() {
        let registry = OpRegistry::with_builtins();
        let def = OpDefinition::from_value(json!({"op": "teleport"}), Document::new("flows/a.yaml")).unwrap();
        let err = registry.build(def).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
        assert!(err.message().contains("teleport"));
    }

    #[test]
    fn test_build_reports_definition_errors() {
        let registry = OpRegistry::with_builtins();
        let def = OpDefinition::from_value(json!({"op": "print"}), Document::new("flows/a.yaml")).unwrap();
        assert!(registry.build(def).is_err());
    }
}
