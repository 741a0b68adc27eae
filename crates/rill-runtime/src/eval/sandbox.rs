//! Sandboxed script engine.
//!
//! User functions run on a Rhai engine assembled from an explicit set of
//! packages. Nothing that touches files, processes, the network or module
//! imports is registered, `eval` is disabled, and operation, call-depth and
//! size limits bound every call.

use std::cmp::Ordering;
use std::sync::Arc;

#[cfg(feature = "config")]
use clap::Args;
use derive_builder::Builder;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, CorePackage, LogicPackage, MoreStringPackage, Package,
};
use rhai::{Array, Dynamic, Engine, EvalAltResult, FLOAT, INT};
use rill_core::{Error, Result};

use super::document::Origin;
use super::function::{ScriptContext, UserFunction};

const TRACING_TARGET: &str = "rill_runtime::sandbox";

const DEFAULT_MAX_OPERATIONS: u64 = 1_000_000;
const DEFAULT_MAX_CALL_LEVELS: usize = 64;
const DEFAULT_MAX_STRING_SIZE: usize = 16 * 1024 * 1024;

/// Limits applied to every sandboxed call.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[cfg_attr(feature = "config", derive(Args))]
pub struct SandboxConfig {
    /// Maximum number of operations a single call may perform
    #[cfg_attr(
        feature = "config",
        arg(
            long = "sandbox-max-operations",
            env = "RILL_SANDBOX_MAX_OPERATIONS",
            default_value_t = DEFAULT_MAX_OPERATIONS
        )
    )]
    #[builder(default = "DEFAULT_MAX_OPERATIONS")]
    pub max_operations: u64,

    /// Maximum function call nesting depth
    #[cfg_attr(
        feature = "config",
        arg(
            long = "sandbox-max-call-levels",
            env = "RILL_SANDBOX_MAX_CALL_LEVELS",
            default_value_t = DEFAULT_MAX_CALL_LEVELS
        )
    )]
    #[builder(default = "DEFAULT_MAX_CALL_LEVELS")]
    pub max_call_levels: usize,

    /// Maximum length of a string value in bytes
    #[cfg_attr(feature = "config", arg(skip = DEFAULT_MAX_STRING_SIZE))]
    #[builder(default = "DEFAULT_MAX_STRING_SIZE")]
    pub max_string_size: usize,
}

impl SandboxConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.max_operations == Some(0) {
            return Err("max_operations must be at least 1".into());
        }
        if self.max_call_levels == Some(0) {
            return Err("max_call_levels must be at least 1".into());
        }
        Ok(())
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_call_levels: DEFAULT_MAX_CALL_LEVELS,
            max_string_size: DEFAULT_MAX_STRING_SIZE,
        }
    }
}

/// The restricted engine user functions are compiled and run on.
#[derive(Clone)]
pub struct Sandbox {
    engine: Arc<Engine>,
    config: SandboxConfig,
}

impl Sandbox {
    /// Builds a sandbox with the given limits.
    pub fn new(config: SandboxConfig) -> Self {
        let mut engine = Engine::new_raw();
        engine.register_global_module(CorePackage::new().as_shared_module());
        engine.register_global_module(LogicPackage::new().as_shared_module());
        engine.register_global_module(BasicMathPackage::new().as_shared_module());
        engine.register_global_module(BasicArrayPackage::new().as_shared_module());
        engine.register_global_module(BasicMapPackage::new().as_shared_module());
        engine.register_global_module(MoreStringPackage::new().as_shared_module());

        engine.set_module_resolver(DummyModuleResolver::new());
        engine.set_max_modules(0);
        engine.disable_symbol("eval");

        engine.set_max_operations(config.max_operations);
        engine.set_max_call_levels(config.max_call_levels);
        engine.set_max_string_size(config.max_string_size);
        engine.set_max_expr_depths(64, 64);

        engine.on_print(|text| tracing::debug!(target: TRACING_TARGET, "{text}"));
        engine.on_debug(|text, source, position| {
            tracing::debug!(
                target: TRACING_TARGET,
                source = source.unwrap_or_default(),
                line = position.line(),
                "{text}"
            );
        });

        register_helpers(&mut engine);
        register_context(&mut engine);

        Self {
            engine: Arc::new(engine),
            config,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Compiles user code that must define a function named `evaluate`.
    pub fn compile(&self, code: &str, origin: Origin) -> Result<UserFunction> {
        UserFunction::compile(self.engine.clone(), code, origin)
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

type FnResult<T> = std::result::Result<T, Box<EvalAltResult>>;

fn register_context(engine: &mut Engine) {
    engine
        .register_type_with_name::<ScriptContext>("Context")
        .register_fn("var", |context: &mut ScriptContext, name: &str| -> FnResult<Dynamic> {
            context.var(name)
        })
        .register_fn("is_var_defined", |context: &mut ScriptContext, name: &str| {
            context.is_var_defined(name)
        });
}

fn register_helpers(engine: &mut Engine) {
    engine
        .register_fn("sum", sum)
        .register_fn("min", |items: Array| extreme(items, Ordering::Less))
        .register_fn("max", |items: Array| extreme(items, Ordering::Greater))
        .register_fn("sorted", sorted)
        .register_fn("parse_json", parse_json)
        .register_fn("to_json", to_json);
}

fn sum(items: Array) -> FnResult<Dynamic> {
    let mut int_total: INT = 0;
    let mut float_total: FLOAT = 0.0;
    let mut is_float = false;
    for item in items {
        if let Some(value) = item.clone().try_cast::<INT>() {
            int_total = int_total
                .checked_add(value)
                .ok_or_else(|| Box::<EvalAltResult>::from("sum overflowed"))?;
        } else if let Some(value) = item.try_cast::<FLOAT>() {
            float_total += value;
            is_float = true;
        } else {
            return Err("sum() expects an array of numbers".into());
        }
    }
    Ok(if is_float {
        Dynamic::from_float(float_total + int_total as FLOAT)
    } else {
        Dynamic::from_int(int_total)
    })
}

fn extreme(items: Array, wanted: Ordering) -> FnResult<Dynamic> {
    let mut best: Option<Dynamic> = None;
    for item in items {
        best = match best {
            None => Some(item),
            Some(current) => {
                if compare(&item, &current)? == wanted {
                    Some(item)
                } else {
                    Some(current)
                }
            }
        };
    }
    best.ok_or_else(|| "expected a non-empty array".into())
}

fn sorted(items: Array) -> FnResult<Array> {
    let mut items = items;
    let mut failure = None;
    items.sort_by(|a, b| {
        compare(a, b).unwrap_or_else(|err| {
            failure.get_or_insert(err);
            Ordering::Equal
        })
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(items),
    }
}

fn compare(a: &Dynamic, b: &Dynamic) -> FnResult<Ordering> {
    if let (Some(x), Some(y)) = (a.as_int().ok(), b.as_int().ok()) {
        return Ok(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y).ok_or_else(|| "cannot compare NaN".into());
    }
    if a.is_string() && b.is_string() {
        return Ok(a.to_string().cmp(&b.to_string()));
    }
    if let (Ok(x), Ok(y)) = (a.as_bool(), b.as_bool()) {
        return Ok(x.cmp(&y));
    }
    Err(format!("cannot compare {} with {}", a.type_name(), b.type_name()).into())
}

fn as_number(value: &Dynamic) -> Option<FLOAT> {
    value
        .as_float()
        .ok()
        .or_else(|| value.as_int().ok().map(|int| int as FLOAT))
}

fn parse_json(text: &str) -> FnResult<Dynamic> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|err| Box::<EvalAltResult>::from(format!("invalid JSON: {err}")))?;
    rhai::serde::to_dynamic(value)
}

fn to_json(value: Dynamic) -> FnResult<String> {
    let value: serde_json::Value = rhai::serde::from_dynamic(&value)?;
    Ok(value.to_string())
}

/// Converts a script failure into a user-facing error.
pub(crate) fn script_error(origin: &Origin, err: Box<EvalAltResult>) -> Error {
    let mut err = *err;
    while let EvalAltResult::ErrorInFunctionCall(_, _, inner, _) = err {
        err = *inner;
    }
    let line = err.take_position().line();
    Error::script().with_message(origin.describe("Runtime error", line, err))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::eval::Document;

    fn run(code: &str, args: Vec<serde_json::Value>) -> Result<serde_json::Value> {
        let origin = Document::new("test.yaml").origin("value_expression", code);
        Sandbox::default().compile(code, origin)?.call_values(args)
    }

    #[test]
    fn test_builder_validates_limits() {
        assert!(SandboxConfigBuilder::default().build().is_ok());
        assert!(
            SandboxConfigBuilder::default()
                .max_operations(0u64)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_helpers() {
        let code = r#"
            fn evaluate(items) {
                #{
                    total: sum(items),
                    low: min(items),
                    high: max(items),
                    ordered: sorted(items),
                    parsed: parse_json("{\"a\": [1, 2]}").a,
                    encoded: to_json(#{ k: 1 }),
                }
            }
        "#;
        let out = run(code, vec![json!([3, 1, 2])]).unwrap();
        assert_eq!(out["total"], json!(6));
        assert_eq!(out["low"], json!(1));
        assert_eq!(out["high"], json!(3));
        assert_eq!(out["ordered"], json!([1, 2, 3]));
        assert_eq!(out["parsed"], json!([1, 2]));
        assert_eq!(out["encoded"], json!("{\"k\":1}"));
    }

    #[test]
    fn test_eval_is_disabled() {
        let err = run("fn evaluate() { eval(\"1\") }", vec![]).unwrap_err();
        assert_eq!(err.kind(), rill_core::ErrorKind::Syntax);
    }

    #[test]
    fn test_imports_are_rejected() {
        let err = run("fn evaluate() { import \"std\" as s; 1 }", vec![]).unwrap_err();
        assert_eq!(err.kind(), rill_core::ErrorKind::Script);
    }

    #[test]
    fn test_operation_limit() {
        let config = SandboxConfigBuilder::default()
            .max_operations(1_000u64)
            .build()
            .unwrap();
        let code = "fn evaluate() { let x = 0; loop { x += 1; } }";
        let origin = Document::new("test.yaml").origin("value_expression", code);
        let err = Sandbox::new(config)
            .compile(code, origin)
            .unwrap()
            .call_values(vec![])
            .unwrap_err();
        assert_eq!(err.kind(), rill_core::ErrorKind::Script);
    }
}
