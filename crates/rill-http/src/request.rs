//! Request definitions and their per-page resolution.

use std::fmt::Write as _;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Url};
use rill_core::{Error, Result};
use rill_runtime::ExecutionContext;
use rill_runtime::eval::{CompiledField, RenderOptions, Sandbox};
use rill_runtime::op::Params;
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

/// Serialization of a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum BodyFormat {
    Json,
    FormUrlencoded,
    MultipartFormData,
    Xml,
    Text,
    Binary,
}

impl BodyFormat {
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Json | Self::FormUrlencoded)
    }
}

/// The `request` section of an `http_request` op, compiled once per run and
/// resolved again for every page.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    url: CompiledField,
    method: CompiledField,
    parameters: Option<CompiledField>,
    headers: Option<CompiledField>,
    body: Option<(BodyFormat, CompiledField)>,
}

impl RequestTemplate {
    /// Compiles the request fields.
    ///
    /// `body_format` is resolved here; it is required whenever a body is
    /// given and must be a supported format.
    pub fn compile(ctx: &ExecutionContext, request: &Params<'_>, sandbox: &Sandbox) -> Result<Self> {
        let url = request.required("url")?.compile(sandbox)?;
        let method = request.required("method")?.compile(sandbox)?;
        let parameters = request.field("parameters")?.map(|f| f.compile(sandbox)).transpose()?;
        let headers = request.field("headers")?.map(|f| f.compile(sandbox)).transpose()?;

        let body = match request.field("body")? {
            None => None,
            Some(body) => {
                let Some(format) = request.string(ctx, "body_format")? else {
                    return Err(Error::invalid_definition().with_message(
                        "body_format is required when request body is provided (e.g. \"json\", \"form_urlencoded\")",
                    ));
                };
                let format: BodyFormat = format.parse().map_err(|_| {
                    Error::invalid_definition().with_message(format!("Unknown body_format: {format}"))
                })?;
                if !format.is_supported() {
                    return Err(Error::invalid_definition()
                        .with_message(format!("{format} body format is not supported yet")));
                }
                Some((format, body.compile(sandbox)?))
            }
        };

        Ok(Self {
            url,
            method,
            parameters,
            headers,
            body,
        })
    }

    /// Resolves every field against the current variables.
    pub fn resolve(&self, ctx: &ExecutionContext) -> Result<PreparedRequest> {
        let url = match self.url.resolve(ctx, RenderOptions::default())? {
            Value::String(url) => url,
            other => {
                return Err(Error::invalid_definition()
                    .with_message(format!("request url must be a string, got: {other}")));
            }
        };
        let url = Url::parse(&url)
            .map_err(|err| Error::invalid_definition().with_message(format!("Invalid request url '{url}': {err}")))?;

        let method = match self.method.resolve(ctx, RenderOptions::default())? {
            Value::String(method) => method,
            other => {
                return Err(Error::invalid_definition()
                    .with_message(format!("request method must be a string, got: {other}")));
            }
        };
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
            Error::invalid_definition().with_message(format!("Invalid request method '{method}'"))
        })?;

        let query = pairs("parameters", self.parameters.as_ref(), ctx)?;
        let headers = pairs("headers", self.headers.as_ref(), ctx)?;
        let body = match &self.body {
            None => None,
            Some((format, body)) => Some(RequestBody::new(*format, body.resolve(ctx, RenderOptions::NULL_LITERAL)?)?),
        };

        Ok(PreparedRequest {
            method,
            url,
            query,
            headers,
            body,
        })
    }
}

/// Resolves a mapping field into name/value pairs, dropping nulls.
fn pairs(key: &str, field: Option<&CompiledField>, ctx: &ExecutionContext) -> Result<Vec<(String, String)>> {
    let Some(field) = field else {
        return Ok(Vec::new());
    };
    match field.resolve(ctx, RenderOptions::NULL_LITERAL)? {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(map
            .into_iter()
            .filter_map(|(name, value)| scalar_text(value).map(|value| (name, value)))
            .collect()),
        other => Err(Error::invalid_definition()
            .with_message(format!("request {key} must be a mapping, got: {other}"))),
    }
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

/// A serialized request body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    pub format: BodyFormat,
    pub value: Value,
}

impl RequestBody {
    fn new(format: BodyFormat, value: Value) -> Result<Self> {
        if format == BodyFormat::FormUrlencoded && !matches!(value, Value::Object(_)) {
            return Err(Error::invalid_definition()
                .with_message(format!("form_urlencoded body must be a mapping, got: {value}")));
        }
        Ok(Self { format, value })
    }

    fn form_pairs(&self) -> Vec<(String, String)> {
        match &self.value {
            Value::Object(map) => map
                .iter()
                .filter_map(|(name, value)| scalar_text(value.clone()).map(|value| (name.clone(), value)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A fully resolved request, ready to be sent any number of times.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl PreparedRequest {
    /// The URL including query parameters.
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        url
    }

    /// Path and query, as used in a digest `uri`.
    pub fn request_uri(&self) -> String {
        let url = self.full_url();
        match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_owned(),
        }
    }

    /// Builds a reqwest request.
    pub fn builder(&self, client: &Client) -> RequestBuilder {
        let mut builder = client.request(self.method.clone(), self.full_url());
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        let has_content_type = self
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
        match &self.body {
            Some(body) if body.format == BodyFormat::Json => {
                if has_content_type {
                    builder = builder.body(body.value.to_string());
                } else {
                    builder = builder.json(&body.value);
                }
            }
            Some(body) => builder = builder.form(&body.form_pairs()),
            None => {}
        }
        builder
    }

    /// Human-readable rendering for preview traces.
    pub fn describe(&self) -> String {
        let mut out = format!("{} {}\n", self.method, self.full_url());
        for (name, value) in &self.headers {
            let _ = writeln!(out, "{name}: {value}");
        }
        if let Some(body) = &self.body {
            let _ = write!(out, "\n{}", body.value);
        }
        out
    }
}
