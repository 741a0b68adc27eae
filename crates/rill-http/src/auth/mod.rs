//! Authentication strategies for HTTP sources.
//!
//! The strategy is chosen by the `type` key of a source's `auth` section and
//! resolved once per op run. Stateful strategies (digest challenges, OAuth2
//! tokens) keep their state for the rest of that run.

mod digest;
mod oauth2;

use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode};
use rill_core::{Error, Result};
use rill_runtime::ExecutionContext;
use rill_runtime::op::Params;
use strum::{AsRefStr, Display, EnumString};

pub use self::digest::{DigestAlgorithm, DigestAuth, DigestChallenge};
pub use self::oauth2::{AccessToken, PasswordGrant};
use crate::client::HttpClient;
use crate::request::PreparedRequest;

const TRACING_TARGET: &str = "rill_http::auth";

/// Value of `auth.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum AuthType {
    BasicAuth,
    DigestAuth,
    BearerToken,
    ApiKey,
    Oauth1,
    Oauth2,
}

/// Where an API key is placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum KeyLocation {
    #[default]
    Header,
    Query,
}

/// A resolved authentication strategy.
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    Basic {
        username: String,
        password: Option<String>,
    },
    Bearer {
        token: String,
    },
    ApiKey {
        name: String,
        value: String,
        location: KeyLocation,
    },
    Digest(DigestAuth),
    OAuth2(PasswordGrant),
}

impl AuthStrategy {
    /// Resolves an `auth` section.
    ///
    /// Unknown and unimplemented types are rejected with an
    /// unsupported-auth error.
    pub fn from_params(ctx: &ExecutionContext, auth: &Params<'_>) -> Result<Self> {
        let kind = auth.required_string(ctx, "type")?;
        let kind: AuthType = kind
            .parse()
            .map_err(|_| Error::unsupported_auth().with_message(format!("Unsupported auth type: {kind}")))?;
        let required = |key: &str| auth.required_string(ctx, key);

        let strategy = match kind {
            AuthType::BasicAuth => Self::Basic {
                username: required("username")?,
                password: auth.string(ctx, "password")?,
            },
            AuthType::BearerToken => Self::Bearer {
                token: required("token")?,
            },
            AuthType::DigestAuth => Self::Digest(DigestAuth::new(required("username")?, required("password")?)),
            AuthType::ApiKey => {
                let location = match auth.string(ctx, "add_to")? {
                    None => KeyLocation::default(),
                    Some(add_to) => add_to.parse().map_err(|_| {
                        Error::invalid_definition().with_message(format!(
                            "Unsupported add_to location: {add_to} (expected 'header' or 'query')"
                        ))
                    })?,
                };
                Self::ApiKey {
                    name: required("key_name")?,
                    value: required("key_value")?,
                    location,
                }
            }
            AuthType::Oauth1 => {
                return Err(Error::unsupported_auth().with_message("oauth1 auth is not supported yet"));
            }
            AuthType::Oauth2 => match auth.string(ctx, "grant_type")?.as_deref() {
                Some("password") => Self::OAuth2(PasswordGrant::new(
                    required("token_endpoint")?,
                    required("client_id")?,
                    auth.string(ctx, "client_secret")?,
                    required("username")?,
                    required("password")?,
                )),
                other => {
                    return Err(Error::unsupported_auth().with_message(format!(
                        "Unsupported oauth2 grant type: {}",
                        other.unwrap_or("<none>")
                    )));
                }
            },
        };

        tracing::debug!(target: TRACING_TARGET, auth_type = %kind, "Auth strategy resolved");
        Ok(strategy)
    }

    /// Sends a request with credentials applied.
    pub async fn send(&mut self, client: &HttpClient, request: &PreparedRequest) -> Result<Response> {
        let builder = request.builder(client.http());
        match self {
            Self::Basic { username, password } => client.execute(builder.basic_auth(username, password.as_ref())).await,
            Self::Bearer { token } => client.execute(builder.bearer_auth(token)).await,
            Self::ApiKey {
                name,
                value,
                location: KeyLocation::Header,
            } => client.execute(builder.header(name.as_str(), value.as_str())).await,
            Self::ApiKey {
                name,
                value,
                location: KeyLocation::Query,
            } => client.execute(builder.query(&[(name.as_str(), value.as_str())])).await,
            Self::OAuth2(grant) => {
                let token = grant.access_token(client).await?;
                client.execute(builder.bearer_auth(token)).await
            }
            Self::Digest(digest) => send_digest(digest, client, request).await,
        }
    }
}

/// Sends with the cached challenge if there is one; answers a fresh
/// challenge once.
async fn send_digest(digest: &mut DigestAuth, client: &HttpClient, request: &PreparedRequest) -> Result<Response> {
    let method = request.method.as_str();
    let uri = request.request_uri();

    let builder = request.builder(client.http());
    let response = match digest.authorization(method, &uri) {
        Some(header) => client.execute(builder.header(AUTHORIZATION, header)).await?,
        None => client.execute(builder).await?,
    };
    if response.status() != StatusCode::UNAUTHORIZED {
        return Ok(response);
    }

    let challenge = response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.trim_start().to_ascii_lowercase().starts_with("digest"))
        .map(DigestChallenge::parse)
        .transpose()?;
    let Some(challenge) = challenge else {
        return Ok(response);
    };

    tracing::debug!(target: TRACING_TARGET, realm = %challenge.realm, "Answering digest challenge");
    digest.accept(challenge);
    let header = digest
        .authorization(method, &uri)
        .ok_or_else(|| Error::internal().with_message("digest challenge missing after accept"))?;
    client
        .execute(request.builder(client.http()).header(AUTHORIZATION, header))
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rill_core::ErrorKind;
    use rill_runtime::eval::{Document, Sandbox};
    use rill_runtime::op::OpRegistry;
    use rill_runtime::project::MemoryProject;
    use rill_runtime::{JobHandle, Scope};
    use serde_json::{Value, json};

    use super::*;

    fn resolve(auth: Value) -> Result<AuthStrategy> {
        let handle = JobHandle::new(
            Arc::new(MemoryProject::new("test")),
            Arc::new(OpRegistry::new()),
            Sandbox::default(),
        );
        let mut ctx = ExecutionContext::new(handle);
        ctx.set_variable("secret", json!("s3cr3t"), Scope::Local);
        let document = Document::new("sources/api.yaml");
        let fields = auth.as_object().cloned().unwrap_or_default();
        AuthStrategy::from_params(&ctx, &Params::new(&fields, &document))
    }

    #[test]
    fn test_api_key_defaults_to_header() {
        let strategy = resolve(json!({"type": "api_key", "key_name": "X-Key", "key_value": "{{ var('secret') }}"}))
            .unwrap();
        let AuthStrategy::ApiKey { name, value, location } = strategy else {
            panic!("expected api key");
        };
        assert_eq!((name.as_str(), value.as_str(), location), ("X-Key", "s3cr3t", KeyLocation::Header));
    }

    #[test]
    fn test_unknown_and_unimplemented_types() {
        let err = resolve(json!({"type": "kerberos"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAuth);
        assert_eq!(err.message(), "Unsupported auth type: kerberos");

        let err = resolve(json!({"type": "oauth1"})).unwrap_err();
        assert_eq!(err.message(), "oauth1 auth is not supported yet");

        let err = resolve(json!({"type": "oauth2", "grant_type": "client_credentials"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAuth);
    }

    #[test]
    fn test_missing_fields() {
        let err = resolve(json!({"type": "bearer_token"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
        let err = resolve(json!({"type": "api_key", "key_name": "k", "key_value": "v", "add_to": "body"})).unwrap_err();
        assert!(err.message().contains("Unsupported add_to location"));
    }
}
