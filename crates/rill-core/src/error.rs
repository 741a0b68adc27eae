//! Common error type definitions.

use strum::{AsRefStr, Display, IntoStaticStr};
use thiserror::Error;

use crate::trace::Trace;

/// Type alias for boxed dynamic errors that can be sent across threads.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for Results with our custom Error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categories of errors that can occur while running a pipeline.
///
/// Every kind except [`ErrorKind::Connector`], [`ErrorKind::Serialization`]
/// and [`ErrorKind::Internal`] describes a pipeline-authoring mistake and is
/// reported as a user error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, IntoStaticStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Flow, op or source definition is malformed.
    InvalidDefinition,
    /// A referenced variable is not bound in the context.
    UndefinedVariable,
    /// Template rendering failed.
    Template,
    /// User code failed to compile.
    Syntax,
    /// User code does not define the expected function.
    FunctionNotFound,
    /// User code failed at run time.
    Script,
    /// Authentication against an external system failed.
    Authentication,
    /// The configured auth strategy is unknown or not implemented.
    UnsupportedAuth,
    /// A named flow, source or op does not exist.
    NotFound,
    /// A source connection or HTTP transport failed.
    Connector,
    /// Serialization/deserialization error.
    Serialization,
    /// Engine defect.
    Internal,
}

impl ErrorKind {
    /// Returns true if this kind is reported as a user error.
    pub const fn is_user_error(self) -> bool {
        !matches!(self, Self::Connector | Self::Serialization | Self::Internal)
    }
}

/// A structured error type for pipeline execution.
#[derive(Debug, Error)]
#[error("{}", message.as_deref().unwrap_or_else(|| kind.as_ref()))]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional error message.
    pub message: Option<String>,
    /// Optional source error.
    #[source]
    pub source: Option<BoxedError>,
    /// Call trace captured by the job runner.
    pub trace: Option<Trace>,
}

impl Error {
    /// Creates a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            trace: None,
        }
    }

    /// Adds a message to this error.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Adds a source error to this error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attaches a call trace to this error.
    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Creates a new invalid definition error.
    pub fn invalid_definition() -> Self {
        Self::new(ErrorKind::InvalidDefinition)
    }

    /// Creates a new undefined variable error.
    pub fn undefined_variable() -> Self {
        Self::new(ErrorKind::UndefinedVariable)
    }

    /// Creates a new template error.
    pub fn template() -> Self {
        Self::new(ErrorKind::Template)
    }

    /// Creates a new syntax error.
    pub fn syntax() -> Self {
        Self::new(ErrorKind::Syntax)
    }

    /// Creates a new function not found error.
    pub fn function_not_found() -> Self {
        Self::new(ErrorKind::FunctionNotFound)
    }

    /// Creates a new script error.
    pub fn script() -> Self {
        Self::new(ErrorKind::Script)
    }

    /// Creates a new authentication error.
    pub fn authentication() -> Self {
        Self::new(ErrorKind::Authentication)
    }

    /// Creates a new unsupported auth error.
    pub fn unsupported_auth() -> Self {
        Self::new(ErrorKind::UnsupportedAuth)
    }

    /// Creates a new not found error.
    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound)
    }

    /// Creates a new connector error.
    pub fn connector() -> Self {
        Self::new(ErrorKind::Connector)
    }

    /// Creates a new serialization error.
    pub fn serialization() -> Self {
        Self::new(ErrorKind::Serialization)
    }

    /// Creates a new internal error.
    pub fn internal() -> Self {
        Self::new(ErrorKind::Internal)
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error kind as a string.
    pub fn kind_str(&self) -> &'static str {
        self.kind.into()
    }

    /// Returns the message, falling back to the kind name.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_else(|| self.kind.as_ref())
    }

    /// Returns the attached call trace, if any.
    pub fn trace(&self) -> Option<&Trace> {
        self.trace.as_ref()
    }

    /// Returns true if this is a user error.
    pub fn is_user_error(&self) -> bool {
        self.kind.is_user_error()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization()
            .with_message(err.to_string())
            .with_source(err)
    }
}
