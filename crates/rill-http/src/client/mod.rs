//! Reqwest-based HTTP client.

mod config;

use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Response};
use rill_core::{Error, Result};

pub use self::config::{DEFAULT_TIMEOUT_SECS, HttpClientConfig};
use crate::auth::AuthStrategy;
use crate::request::PreparedRequest;

/// Tracing target for HTTP client operations.
pub const TRACING_TARGET: &str = "rill_http::client";

/// Inner client that holds the HTTP client and configuration.
struct HttpClientInner {
    http: Client,
    config: HttpClientConfig,
}

/// HTTP client shared by every `http_request` op of a process.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<HttpClientInner>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be created.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let timeout = config.effective_timeout();
        let user_agent = config.effective_user_agent();

        tracing::debug!(
            target: TRACING_TARGET,
            timeout = ?timeout,
            user_agent = %user_agent,
            "Creating HTTP client"
        );

        let http = Client::builder()
            .timeout(timeout)
            .user_agent(&user_agent)
            .build()
            .map_err(|err| {
                Error::internal()
                    .with_message("failed to create HTTP client")
                    .with_source(err)
            })?;

        Ok(Self {
            inner: Arc::new(HttpClientInner { http, config }),
        })
    }

    /// Creates a new client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpClientConfig::default())
    }

    /// Gets the client configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.inner.config
    }

    /// Gets the underlying HTTP client.
    pub(crate) fn http(&self) -> &Client {
        &self.inner.http
    }

    /// Sends a request, authenticated by `auth` when given.
    pub async fn send(&self, request: &PreparedRequest, auth: Option<&mut AuthStrategy>) -> Result<Response> {
        match auth {
            Some(auth) => auth.send(self, request).await,
            None => self.execute(request.builder(self.http())).await,
        }
    }

    /// Sends a built request, mapping transport failures to connector errors.
    pub(crate) async fn execute(&self, builder: RequestBuilder) -> Result<Response> {
        builder.send().await.map_err(|err| {
            let reason = if err.is_timeout() {
                "request timed out"
            } else if err.is_connect() {
                "connection failed"
            } else {
                "request failed"
            };
            tracing::warn!(target: TRACING_TARGET, error = %err, "HTTP {reason}");
            Error::connector()
                .with_message(format!("HTTP {reason}: {err}"))
                .with_source(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpClient::with_defaults().unwrap();
        assert!(client.config().http_user_agent.is_none());
    }
}
