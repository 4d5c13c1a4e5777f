//! Outbound HTTP for the OAuth flow, behind an injectable trait.
//!
//! The custom-fetch seam is an explicit strategy on the configuration: the
//! router and callback handler only ever talk to `dyn OAuthHttp`, so tests
//! (and hosts with special transport needs) swap the implementation without
//! touching protocol logic.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use super::OAuth2Error;
use crate::providers::OAuthProvider;

#[derive(Debug, Error, Clone)]
pub enum HttpClientError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected status: {0}")]
    Status(u16),

    #[error("Invalid response body: {0}")]
    Body(String),
}

#[async_trait]
pub trait OAuthHttp: Send + Sync {
    async fn post_form(
        &self,
        url: &Url,
        params: &[(&str, &str)],
    ) -> Result<Value, HttpClientError>;

    async fn get_json(&self, url: &Url, bearer: Option<&str>) -> Result<Value, HttpClientError>;
}

/// Default transport. OAuth2 operations should complete quickly; the 30 s
/// timeout prevents a hung authorization server from pinning request tasks.
pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(32)
            .build()
            .expect("Failed to create reqwest client");
        Self { client }
    }
}

impl Default for ReqwestHttp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OAuthHttp for ReqwestHttp {
    async fn post_form(
        &self,
        url: &Url,
        params: &[(&str, &str)],
    ) -> Result<Value, HttpClientError> {
        let response = self
            .client
            .post(url.clone())
            .form(params)
            .send()
            .await
            .map_err(|e| HttpClientError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpClientError::Status(status.as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| HttpClientError::Body(e.to_string()))
    }

    async fn get_json(&self, url: &Url, bearer: Option<&str>) -> Result<Value, HttpClientError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| HttpClientError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpClientError::Status(status.as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| HttpClientError::Body(e.to_string()))
    }
}

/// The token endpoint response the callback handler consumes.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenSet {
    pub(crate) access_token: String,
    pub(crate) id_token: Option<String>,
    pub(crate) token_type: Option<String>,
    pub(crate) expires_in: Option<i64>,
    pub(crate) refresh_token: Option<String>,
    pub(crate) scope: Option<String>,
}

/// Exchange the authorization code for tokens, supplying the PKCE verifier
/// when the flow used one.
pub(crate) async fn exchange_code(
    provider: &OAuthProvider,
    code: &str,
    pkce_verifier: Option<&str>,
    redirect_uri: &str,
    http: &dyn OAuthHttp,
) -> Result<TokenSet, OAuth2Error> {
    let mut params = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", provider.client_id.as_str()),
        ("client_secret", provider.client_secret.as_str()),
        ("redirect_uri", redirect_uri),
    ];
    if let Some(verifier) = pkce_verifier {
        params.push(("code_verifier", verifier));
    }

    let body = http
        .post_form(&provider.token_endpoint, &params)
        .await
        .map_err(|e| OAuth2Error::TokenExchange(e.to_string()))?;

    serde_json::from_value(body).map_err(|e| OAuth2Error::TokenExchange(e.to_string()))
}

pub(crate) async fn fetch_userinfo(
    provider: &OAuthProvider,
    access_token: &str,
    http: &dyn OAuthHttp,
) -> Result<Value, OAuth2Error> {
    let endpoint = provider
        .userinfo_endpoint
        .as_ref()
        .ok_or_else(|| OAuth2Error::FetchUserInfo("no userinfo endpoint configured".to_string()))?;
    http.get_json(endpoint, Some(access_token))
        .await
        .map_err(|e| OAuth2Error::FetchUserInfo(e.to_string()))
}
