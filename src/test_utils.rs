//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use http::header::{CONTENT_TYPE, COOKIE};
use http::{HeaderMap, HeaderValue, Method};
use serde_json::Value;
use url::Url;

use crate::config::AuthConfig;
use crate::oauth2::{HttpClientError, OAuthHttp};
use crate::providers::{OAuthProvider, Provider};
use crate::request::RequestInternal;
use crate::response::Cookie;

pub(crate) const TEST_SECRET: &str = "test-secret-0123456789abcdef0123456789";

pub(crate) fn test_oauth_provider(id: &str) -> OAuthProvider {
    OAuthProvider::new(
        id,
        "Test Provider",
        "client-id",
        "client-secret",
        Url::parse("https://provider.example/oauth/authorize").unwrap(),
        Url::parse("https://provider.example/oauth/token").unwrap(),
    )
    .with_userinfo(Url::parse("https://provider.example/oauth/userinfo").unwrap())
}

pub(crate) fn test_providers() -> Vec<Provider> {
    vec![Provider::OAuth(test_oauth_provider("acme"))]
}

pub(crate) fn test_config() -> AuthConfig {
    AuthConfig::new(
        Url::parse("https://app.example").unwrap(),
        TEST_SECRET,
        test_providers(),
    )
    .unwrap()
}

fn cookie_header(cookies: &[(&str, &str)]) -> Option<HeaderValue> {
    if cookies.is_empty() {
        return None;
    }
    let header = cookies
        .iter()
        .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("; ");
    Some(HeaderValue::from_str(&header).unwrap())
}

pub(crate) fn test_request_with_cookies(
    path_and_query: &str,
    cookies: &[(&str, &str)],
) -> RequestInternal {
    let url = Url::parse(&format!("https://app.example{path_and_query}")).unwrap();
    let mut headers = HeaderMap::new();
    if let Some(header) = cookie_header(cookies) {
        headers.insert(COOKIE, header);
    }
    RequestInternal::new(Method::GET, url, headers, None, "/api/auth").unwrap()
}

pub(crate) fn test_post_request(
    path_and_query: &str,
    form_body: &str,
    cookies: &[(&str, &str)],
) -> RequestInternal {
    let url = Url::parse(&format!("https://app.example{path_and_query}")).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    if let Some(header) = cookie_header(cookies) {
        headers.insert(COOKIE, header);
    }
    RequestInternal::new(Method::POST, url, headers, Some(form_body), "/api/auth").unwrap()
}

/// Response cookies as request cookie pairs, dropping expirations.
pub(crate) fn cookie_pairs(cookies: &[Cookie]) -> Vec<(String, String)> {
    cookies
        .iter()
        .filter(|c| c.options.max_age != Some(0))
        .map(|c| (c.name.clone(), c.value.clone()))
        .collect()
}

/// Borrow owned pairs for the request builders.
pub(crate) fn cookie_refs(pairs: &[(String, String)]) -> Vec<(&str, &str)> {
    pairs.iter().map(|(n, v)| (n.as_str(), v.as_str())).collect()
}

/// Canned transport: `post_form` answers with the token response (recording
/// the submitted params), `get_json` with the JSON document.
pub(crate) struct MockOAuthHttp {
    token_response: Value,
    json_response: Value,
    forms: Mutex<Vec<HashMap<String, String>>>,
}

impl MockOAuthHttp {
    pub(crate) fn new(token_response: Value, json_response: Value) -> Self {
        Self {
            token_response,
            json_response,
            forms: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn last_form(&self) -> HashMap<String, String> {
        self.forms
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl OAuthHttp for MockOAuthHttp {
    async fn post_form(
        &self,
        _url: &Url,
        params: &[(&str, &str)],
    ) -> Result<Value, HttpClientError> {
        self.forms.lock().unwrap().push(
            params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        Ok(self.token_response.clone())
    }

    async fn get_json(&self, _url: &Url, _bearer: Option<&str>) -> Result<Value, HttpClientError> {
        Ok(self.json_response.clone())
    }
}
