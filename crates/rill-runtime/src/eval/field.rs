//! Definition fields that are either templates or user code.

use rill_core::{Error, Result};
use serde_json::{Map, Value};

use super::document::{Document, Origin};
use super::function::UserFunction;
use super::sandbox::Sandbox;
use super::template::{RenderOptions, render};
use crate::context::ExecutionContext;

/// Suffix marking a field whose value is sandboxed code.
pub const EXPRESSION_SUFFIX: &str = "_expression";

/// One logical field of a definition.
///
/// A field `x` is written either as `x` (a literal or template) or as
/// `x_expression` (code defining `evaluate(context)`), never both.
#[derive(Debug, Clone)]
pub enum Field {
    Template(Value),
    Expression { code: String, origin: Origin },
}

impl Field {
    /// Reads the field `key` from a definition mapping.
    pub fn extract(fields: &Map<String, Value>, key: &str, document: &Document) -> Result<Option<Self>> {
        let expression_key = format!("{key}{EXPRESSION_SUFFIX}");
        match (fields.get(key), fields.get(&expression_key)) {
            (Some(_), Some(_)) => Err(Error::invalid_definition().with_message(format!(
                "Only one of '{key}' and '{expression_key}' may be specified in {document}"
            ))),
            (Some(value), None) => Ok(Some(Self::Template(value.clone()))),
            (None, Some(Value::String(code))) => Ok(Some(Self::Expression {
                code: code.clone(),
                origin: document.origin(&expression_key, code),
            })),
            (None, Some(other)) => Err(Error::invalid_definition().with_message(format!(
                "'{expression_key}' in {document} must be a string of code, got: {other}"
            ))),
            (None, None) => Ok(None),
        }
    }

    /// Reads a field that must be present.
    pub fn required(fields: &Map<String, Value>, key: &str, document: &Document) -> Result<Self> {
        Self::extract(fields, key, document)?.ok_or_else(|| {
            Error::invalid_definition().with_message(format!("Missing required parameter '{key}' in {document}"))
        })
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, Self::Expression { .. })
    }

    /// Compiles expression fields; templates pass through untouched.
    pub fn compile(&self, sandbox: &Sandbox) -> Result<CompiledField> {
        match self {
            Self::Template(value) => Ok(CompiledField::Template(value.clone())),
            Self::Expression { code, origin } => {
                Ok(CompiledField::Function(sandbox.compile(code, origin.clone())?))
            }
        }
    }

    /// Compiles and resolves the field in one step.
    pub fn resolve(&self, ctx: &ExecutionContext, options: RenderOptions) -> Result<Value> {
        self.compile(ctx.job().sandbox())?.resolve(ctx, options)
    }
}

/// A field ready to be resolved repeatedly.
#[derive(Debug, Clone)]
pub enum CompiledField {
    Template(Value),
    Function(UserFunction),
}

impl CompiledField {
    /// Renders the template or calls `evaluate(context)`.
    pub fn resolve(&self, ctx: &ExecutionContext, options: RenderOptions) -> Result<Value> {
        match self {
            Self::Template(value) => render(&ctx.view(), value, options),
            Self::Function(function) => function.apply(ctx.view(), Vec::new()),
        }
    }
}
