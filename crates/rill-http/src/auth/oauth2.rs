//! OAuth2 resource-owner password grant.

use jiff::{SignedDuration, Timestamp};
use rill_core::{Error, Result};
use serde::Deserialize;

use crate::client::HttpClient;

const TRACING_TARGET: &str = "rill_http::auth::oauth2";

/// Tokens are treated as expired this long before their stated expiry.
const EXPIRY_MARGIN: SignedDuration = SignedDuration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// An access token held for the lifetime of one op run.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<Timestamp>,
}

impl AccessToken {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at - EXPIRY_MARGIN)
    }
}

/// Password-grant credentials plus the cached token.
#[derive(Debug, Clone)]
pub struct PasswordGrant {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub username: String,
    pub password: String,
    token: Option<AccessToken>,
}

impl PasswordGrant {
    pub fn new(
        token_endpoint: String,
        client_id: String,
        client_secret: Option<String>,
        username: String,
        password: String,
    ) -> Self {
        Self {
            token_endpoint,
            client_id,
            client_secret,
            username,
            password,
            token: None,
        }
    }

    /// Returns a usable access token, fetching or refreshing it first if
    /// needed.
    pub async fn access_token(&mut self, client: &HttpClient) -> Result<String> {
        let now = Timestamp::now();
        let token = match self.token.take() {
            Some(token) if !token.is_expired(now) => token,
            Some(AccessToken {
                refresh_token: Some(refresh_token),
                ..
            }) => {
                tracing::debug!(target: TRACING_TARGET, "Refreshing expired access token");
                let grant = [("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str())];
                match self.request(client, &grant).await {
                    Ok(token) => token,
                    Err(err) => {
                        tracing::debug!(target: TRACING_TARGET, error = %err, "Refresh failed, fetching a new token");
                        self.fetch(client).await?
                    }
                }
            }
            _ => self.fetch(client).await?,
        };
        let access_token = token.access_token.clone();
        self.token = Some(token);
        Ok(access_token)
    }

    async fn fetch(&self, client: &HttpClient) -> Result<AccessToken> {
        tracing::debug!(target: TRACING_TARGET, endpoint = %self.token_endpoint, "Fetching access token");
        self.request(
            client,
            &[
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ],
        )
        .await
    }

    async fn request(&self, client: &HttpClient, grant: &[(&str, &str)]) -> Result<AccessToken> {
        let mut form: Vec<(&str, &str)> = grant.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = client
            .execute(client.http().post(&self.token_endpoint).form(&form))
            .await?;
        let status = response.status();
        let text = response.text().await.map_err(|err| {
            Error::connector()
                .with_message("failed to read token response")
                .with_source(err)
        })?;
        if !status.is_success() {
            return Err(Error::authentication().with_message(format!(
                "Token request to {} failed with status {status}: {text}",
                self.token_endpoint
            )));
        }

        let token: TokenResponse = serde_json::from_str(&text).map_err(|err| {
            Error::authentication()
                .with_message(format!("Invalid token response from {}: {err}", self.token_endpoint))
        })?;
        Ok(AccessToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|secs| Timestamp::now() + SignedDuration::from_secs(secs)),
        })
    }
}
