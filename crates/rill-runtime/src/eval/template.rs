//! Template rendering of definition fields.

use std::sync::{LazyLock, Mutex, PoisonError};

use minijinja::value::Object;
use minijinja::{Environment, State, UndefinedBehavior};
use rill_core::{Error, Result};
use serde_json::{Map, Value};

use crate::variable::VariableView;

/// Sentinel that renders to an explicit null in null-literal mode.
pub const NULL_LITERAL: &str = "__NULL__";

/// Options applied while rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Converts strings that render to [`NULL_LITERAL`] into `null`.
    pub null_literal: bool,
}

impl RenderOptions {
    /// Rendering that honours [`NULL_LITERAL`].
    pub const NULL_LITERAL: Self = Self { null_literal: true };
}

/// Returns true if a string contains template syntax.
pub fn is_template(text: &str) -> bool {
    text.contains("{{") || text.contains("{%") || text.contains("{#")
}

/// Renders every string inside `value` against the visible variables.
///
/// Mappings and sequences are rendered recursively; non-string scalars are
/// returned unchanged. Strings without template syntax are never handed to
/// the template engine, so literals render to themselves.
pub fn render(view: &VariableView, value: &Value, options: RenderOptions) -> Result<Value> {
    TemplateRenderer::new(view.clone()).render(value, options)
}

/// Renders a single template string.
pub fn render_str(view: &VariableView, template: &str) -> Result<String> {
    TemplateRenderer::new(view.clone()).render_str(template)
}

/// Name under which the variable scope is handed to the template context.
const SCOPE_KEY: &str = "__rill_scope";

/// Shared environment, built once with `var` and `is_var_defined`.
static ENVIRONMENT: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_function("var", var);
    env.add_function("is_var_defined", is_var_defined);
    env
});

/// Variables visible to one render, plus the first name that failed to resolve.
#[derive(Debug)]
struct TemplateScope {
    view: VariableView,
    missing: Mutex<Option<String>>,
}

impl Object for TemplateScope {}

fn scope(state: &State<'_, '_>) -> Result<minijinja::Value, minijinja::Error> {
    state.lookup(SCOPE_KEY).ok_or_else(|| {
        minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, "template has no variable scope")
    })
}

fn var(state: &State<'_, '_>, name: String) -> Result<minijinja::Value, minijinja::Error> {
    let scope = scope(state)?;
    let Some(scope) = scope.downcast_object_ref::<TemplateScope>() else {
        return Err(minijinja::Error::new(
            minijinja::ErrorKind::InvalidOperation,
            "template has no variable scope",
        ));
    };
    match scope.view.get(&name) {
        Some(value) => Ok(minijinja::Value::from_serialize(&value)),
        None => {
            let err = minijinja::Error::new(
                minijinja::ErrorKind::UndefinedError,
                format!("variable '{name}' is not defined"),
            );
            *scope.missing.lock().unwrap_or_else(PoisonError::into_inner) = Some(name);
            Err(err)
        }
    }
}

fn is_var_defined(state: &State<'_, '_>, name: String) -> Result<bool, minijinja::Error> {
    let scope = scope(state)?;
    Ok(scope
        .downcast_object_ref::<TemplateScope>()
        .is_some_and(|scope| scope.view.contains(&name)))
}

/// Renders templates against one variable view.
///
/// Exposes `var(name)`, which fails on undefined names, and
/// `is_var_defined(name)`. Undefined plain identifiers are errors too.
/// Every renderer shares one template environment.
pub struct TemplateRenderer {
    scope: minijinja::Value,
}

impl TemplateRenderer {
    pub fn new(view: VariableView) -> Self {
        let scope = TemplateScope {
            view,
            missing: Mutex::new(None),
        };
        Self {
            scope: minijinja::Value::from_object(scope),
        }
    }

    /// Renders every string inside `value`.
    pub fn render(&self, value: &Value, options: RenderOptions) -> Result<Value> {
        match value {
            Value::String(text) => {
                let rendered = if is_template(text) {
                    self.render_str(text)?
                } else {
                    text.clone()
                };
                if options.null_literal && rendered == NULL_LITERAL {
                    Ok(Value::Null)
                } else {
                    Ok(Value::String(rendered))
                }
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.render(item, options))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut rendered = Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(key.clone(), self.render(item, options)?);
                }
                Ok(Value::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    /// Renders a template string.
    pub fn render_str(&self, template: &str) -> Result<String> {
        let ctx = minijinja::context! { __rill_scope => self.scope.clone() };
        ENVIRONMENT
            .render_str(template, ctx)
            .map_err(|err| self.map_error(template, err))
    }

    fn map_error(&self, template: &str, err: minijinja::Error) -> Error {
        let missing = self
            .scope
            .downcast_object_ref::<TemplateScope>()
            .and_then(|scope| scope.missing.lock().unwrap_or_else(PoisonError::into_inner).take());
        if let Some(name) = missing {
            return Error::undefined_variable().with_message(format!("Variable '{name}' is not defined"));
        }
        if err.kind() == minijinja::ErrorKind::UndefinedError {
            return Error::undefined_variable()
                .with_message(format!("Undefined value in template \"{template}\": {err}"))
                .with_source(err);
        }
        Error::template()
            .with_message(format!("Error rendering template \"{template}\": {err}"))
            .with_source(err)
    }
}
