//! Configuration for the HTTP client.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for the [`HttpClient`](super::HttpClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct HttpClientConfig {
    /// Timeout for a single HTTP request, in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "http-timeout", env = "RILL_HTTP_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)
    )]
    #[serde(default = "default_timeout")]
    pub http_timeout: u64,

    /// User-Agent header sent with every request
    #[cfg_attr(feature = "config", arg(long = "http-user-agent", env = "RILL_HTTP_USER_AGENT"))]
    #[serde(default)]
    pub http_user_agent: Option<String>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            http_timeout: DEFAULT_TIMEOUT_SECS,
            http_user_agent: None,
        }
    }
}

impl HttpClientConfig {
    /// Returns the default user agent string.
    fn default_user_agent() -> String {
        format!("rill/{}", env!("CARGO_PKG_VERSION"))
    }

    /// Returns the effective timeout, using the default if zero.
    pub fn effective_timeout(&self) -> Duration {
        match self.http_timeout {
            0 => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    /// Returns the effective user agent, using the default if unset or empty.
    pub fn effective_user_agent(&self) -> String {
        match self.http_user_agent.as_deref() {
            Some(agent) if !agent.is_empty() => agent.to_owned(),
            _ => Self::default_user_agent(),
        }
    }
}
