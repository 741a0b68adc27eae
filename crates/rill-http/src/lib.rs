#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod auth;
mod client;
mod op;
pub mod request;
pub mod response;

use std::sync::Arc;

use rill_runtime::op::{Op, OpRegistry};

pub use crate::client::{DEFAULT_TIMEOUT_SECS, HttpClient, HttpClientConfig};
pub use crate::op::{HTTP_SOURCE_KIND, HttpRequestOp};

/// Tracing target for HTTP op operations.
pub const TRACING_TARGET: &str = "rill_http";

/// Registers the `http_request` op, sharing `client` between every instance.
pub fn register(registry: &mut OpRegistry, client: HttpClient) {
    tracing::debug!(target: TRACING_TARGET, op = HttpRequestOp::NAME, "Registering op");
    registry.register(HttpRequestOp::NAME, move |definition| {
        Ok(Arc::new(HttpRequestOp::new(definition, client.clone())?) as Arc<dyn Op>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_adds_http_request() {
        let mut registry = OpRegistry::with_builtins();
        register(&mut registry, HttpClient::with_defaults().unwrap());
        assert!(registry.contains("http_request"));
        assert!(registry.contains("print"));
    }
}
