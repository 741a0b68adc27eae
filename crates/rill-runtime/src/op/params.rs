//! Parameter extraction from definition mappings.

use rill_core::{Error, Result, TableAddress};
use serde_json::{Map, Value};

use crate::context::ExecutionContext;
use crate::eval::{Document, Field, RenderOptions};

/// A definition mapping together with the document it came from.
#[derive(Debug, Clone, Copy)]
pub struct Params<'a> {
    fields: &'a Map<String, Value>,
    document: &'a Document,
}

impl<'a> Params<'a> {
    pub fn new(fields: &'a Map<String, Value>, document: &'a Document) -> Self {
        Self { fields, document }
    }

    pub fn fields(&self) -> &'a Map<String, Value> {
        self.fields
    }

    pub fn document(&self) -> &'a Document {
        self.document
    }

    /// Returns the raw value of a key.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.fields.get(key)
    }

    /// Reads an optional field (`key` or `key_expression`).
    pub fn field(&self, key: &str) -> Result<Option<Field>> {
        Field::extract(self.fields, key, self.document)
    }

    /// Reads a required field (`key` or `key_expression`).
    pub fn required(&self, key: &str) -> Result<Field> {
        Field::required(self.fields, key, self.document)
    }

    /// Returns a nested mapping, such as a `request` or `auth` section.
    pub fn section(&self, key: &str) -> Result<Option<Params<'a>>> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(fields)) => Ok(Some(Params::new(fields, self.document))),
            Some(other) => Err(Error::invalid_definition().with_message(format!(
                "'{key}' in {} must be a mapping, got: {other}",
                self.document
            ))),
        }
    }

    /// Returns a nested mapping that must be present.
    pub fn required_section(&self, key: &str) -> Result<Params<'a>> {
        self.section(key)?.ok_or_else(|| self.missing(key))
    }

    /// Resolves an optional field to a string.
    ///
    /// Numbers and booleans are converted; null and the null literal count
    /// as absent.
    pub fn string(&self, ctx: &ExecutionContext, key: &str) -> Result<Option<String>> {
        let Some(field) = self.field(key)? else {
            return Ok(None);
        };
        match field.resolve(ctx, RenderOptions::NULL_LITERAL)? {
            Value::Null => Ok(None),
            Value::String(text) => Ok(Some(text)),
            value @ (Value::Number(_) | Value::Bool(_)) => Ok(Some(value.to_string())),
            other => Err(Error::invalid_definition().with_message(format!(
                "'{key}' in {} must resolve to a string, got: {other}",
                self.document
            ))),
        }
    }

    /// Resolves a required field to a string.
    pub fn required_string(&self, ctx: &ExecutionContext, key: &str) -> Result<String> {
        self.string(ctx, key)?.ok_or_else(|| self.missing(key))
    }

    /// Resolves `database`, `namespace` and `table` into an address.
    pub fn table_address(&self, ctx: &ExecutionContext) -> Result<Option<TableAddress>> {
        let Some(table) = self.string(ctx, "table")? else {
            return Ok(None);
        };
        let mut address = TableAddress::new(table);
        address.namespace = self.string(ctx, "namespace")?;
        address.database = self.string(ctx, "database")?;
        Ok(Some(address))
    }

    /// Error for a missing required key.
    pub fn missing(&self, key: &str) -> Error {
        Error::invalid_definition().with_message(format!(
            "Missing required parameter '{key}' in {}",
            self.document
        ))
    }
}
