//! Responses handed to parsers, and what parsers hand back.

use reqwest::Response;
use rill_core::{Error, Result};
use serde_json::{Map, Value, json};

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub url: String,
    /// Lower-cased header names; repeated headers are joined with `, `.
    pub headers: Map<String, Value>,
    pub text: String,
    /// The body parsed as JSON, or null if it is not JSON.
    pub json: Value,
}

impl HttpResponse {
    /// Reads the status, headers and body.
    pub async fn read(response: Response) -> Result<Self> {
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let mut headers = Map::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            match headers.get_mut(name.as_str()) {
                Some(Value::String(existing)) => {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
                _ => {
                    headers.insert(name.as_str().to_owned(), Value::String(value));
                }
            }
        }
        let text = response.text().await.map_err(|err| {
            Error::connector()
                .with_message(format!("failed to read response body from {url}"))
                .with_source(err)
        })?;
        let json = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok(Self {
            status,
            url,
            headers,
            text,
            json,
        })
    }

    /// Returns true for 2xx statuses.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The value passed to `evaluate(context, response)`.
    pub fn to_value(&self) -> Value {
        json!({
            "status_code": self.status,
            "ok": self.ok(),
            "url": self.url,
            "headers": self.headers,
            "text": self.text,
            "json": self.json,
        })
    }

    /// Body for preview logs: pretty JSON when the body is JSON.
    pub fn pretty_body(&self) -> String {
        match &self.json {
            Value::Null => self.text.clone(),
            json => serde_json::to_string_pretty(json).unwrap_or_else(|_| self.text.clone()),
        }
    }

    /// Status line, headers and raw body.
    pub fn describe(&self) -> String {
        let mut out = format!("{} {}\n", self.status, self.url);
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {}\n", value.as_str().unwrap_or_default()));
        }
        out.push('\n');
        out.push_str(&self.text);
        out
    }
}

/// The result of one parser call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParserOutput {
    /// Variable definitions: plain values or `{value, scope}` mappings.
    pub variables: Map<String, Value>,
    /// Null, a list of rows, or a mapping from table name to rows.
    pub tables: Value,
    /// Whether another request should be issued.
    pub repeat: bool,
}

impl ParserOutput {
    /// Validates what a parser returned. A null result is an empty output.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut fields = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(fields) => fields,
            other => {
                return Err(Error::invalid_definition()
                    .with_message(format!("The response parser must return a mapping, got: {other}")));
            }
        };

        let variables = match fields.remove("variables") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(variables)) => variables,
            Some(other) => {
                return Err(Error::invalid_definition().with_message(format!(
                    "\"variables\" in the result of the response parser must be a mapping, got: {other}"
                )));
            }
        };
        let repeat = match fields.remove("while") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(repeat)) => repeat,
            Some(_) => {
                return Err(Error::invalid_definition()
                    .with_message("\"while\" in the result of the response parser must be a boolean"));
            }
        };

        Ok(Self {
            variables,
            tables: fields.remove("tables").unwrap_or(Value::Null),
            repeat,
        })
    }
}

#[cfg(test)]
mod tests {
    use rill_core::ErrorKind;

    use super::*;

    #[test]
    fn test_parser_output() {
        let output = ParserOutput::from_value(json!({
            "variables": {"cursor": "abc"},
            "tables": [{"id": 1}],
            "while": true
        }))
        .unwrap();
        assert_eq!(output.variables["cursor"], json!("abc"));
        assert_eq!(output.tables, json!([{"id": 1}]));
        assert!(output.repeat);

        assert_eq!(ParserOutput::from_value(Value::Null).unwrap(), ParserOutput::default());
        assert!(!ParserOutput::from_value(json!({})).unwrap().repeat);
    }

    #[test]
    fn test_parser_output_rejects_bad_shapes() {
        let err = ParserOutput::from_value(json!({"while": "yes"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
        assert!(err.message().contains("must be a boolean"));
        assert!(ParserOutput::from_value(json!([1])).is_err());
        assert!(ParserOutput::from_value(json!({"variables": [1]})).is_err());
    }
}
