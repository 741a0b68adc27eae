//! Compiled user functions.

use std::sync::Arc;

use rhai::{AST, CallFnOptions, Dynamic, Engine, EvalAltResult, Scope as RhaiScope};
use rill_core::{Error, Result};
use serde_json::Value;

use super::document::Origin;
use super::sandbox::script_error;
use crate::variable::VariableView;

/// Name of the function user code must define.
pub const ENTRY_POINT: &str = "evaluate";

/// The `context` object handed to user functions.
///
/// Scripts call `context.var("name")` and `context.is_var_defined("name")`.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    view: VariableView,
}

impl ScriptContext {
    pub fn new(view: VariableView) -> Self {
        Self { view }
    }

    pub(crate) fn var(&self, name: &str) -> std::result::Result<Dynamic, Box<EvalAltResult>> {
        match self.view.get(name) {
            Some(value) => rhai::serde::to_dynamic(value),
            None => Err(format!("Variable '{name}' is not defined").into()),
        }
    }

    pub(crate) fn is_var_defined(&self, name: &str) -> bool {
        self.view.contains(name)
    }
}

/// User code compiled in the sandbox, together with where it was defined.
#[derive(Clone)]
pub struct UserFunction {
    engine: Arc<Engine>,
    ast: AST,
    origin: Origin,
}

impl UserFunction {
    pub(crate) fn compile(engine: Arc<Engine>, code: &str, origin: Origin) -> Result<Self> {
        let ast = engine.compile(code).map_err(|err| {
            Error::syntax().with_message(origin.describe("Syntax error", err.1.line(), &err.0))
        })?;

        if !ast.iter_functions().any(|function| function.name == ENTRY_POINT) {
            return Err(Error::function_not_found().with_message(origin.describe(
                "Function not found",
                None,
                format!("the code must define a function named '{ENTRY_POINT}'"),
            )));
        }

        Ok(Self { engine, ast, origin })
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Calls `evaluate(context, args...)`.
    pub fn apply(&self, view: VariableView, args: Vec<Value>) -> Result<Value> {
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(Dynamic::from(ScriptContext::new(view)));
        for arg in args {
            call_args.push(self.to_dynamic(arg)?);
        }
        self.call(call_args)
    }

    /// Calls `evaluate(args...)` without a context argument.
    pub fn call_values(&self, args: Vec<Value>) -> Result<Value> {
        let args = args
            .into_iter()
            .map(|arg| self.to_dynamic(arg))
            .collect::<Result<Vec<_>>>()?;
        self.call(args)
    }

    fn call(&self, args: Vec<Dynamic>) -> Result<Value> {
        let arity = args.len();
        let mut scope = RhaiScope::new();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let result = self
            .engine
            .call_fn_with_options::<Dynamic>(options, &mut scope, &self.ast, ENTRY_POINT, args)
            .map_err(|err| {
                if let EvalAltResult::ErrorFunctionNotFound(signature, _) = err.as_ref()
                    && signature.starts_with(ENTRY_POINT)
                {
                    return Error::function_not_found().with_message(self.origin.describe(
                        "Function not found",
                        None,
                        format!("'{ENTRY_POINT}' must accept {arity} argument(s)"),
                    ));
                }
                script_error(&self.origin, err)
            })?;

        rhai::serde::from_dynamic::<Value>(&result).map_err(|err| {
            Error::script().with_message(self.origin.describe(
                "Runtime error",
                None,
                format!("cannot convert the returned {} value: {err}", result.type_name()),
            ))
        })
    }

    fn to_dynamic(&self, value: Value) -> Result<Dynamic> {
        rhai::serde::to_dynamic(value).map_err(|err| {
            Error::internal().with_message(format!("cannot pass argument to '{ENTRY_POINT}': {err}"))
        })
    }
}

impl std::fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserFunction")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}
