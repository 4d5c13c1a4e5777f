//! Generic request half of the HTTP boundary.
//!
//! A framework adapter normalizes its native request into a
//! [`RequestInternal`] and hands it to the router. Parsing the action and
//! provider id out of the path happens here so the router only ever sees a
//! well-formed request.

use std::collections::HashMap;

use http::header::{CONTENT_TYPE, COOKIE};
use http::{HeaderMap, Method};
use serde_json::{Map, Value};
use url::Url;

use crate::errors::AuthError;

/// The fixed set of authentication HTTP operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Providers,
    Session,
    Csrf,
    SignIn,
    SignOut,
    Callback,
    VerifyRequest,
    Error,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Providers => "providers",
            Self::Session => "session",
            Self::Csrf => "csrf",
            Self::SignIn => "signin",
            Self::SignOut => "signout",
            Self::Callback => "callback",
            Self::VerifyRequest => "verify-request",
            Self::Error => "error",
        }
    }

    pub(crate) fn parse(segment: &str) -> Option<Self> {
        match segment {
            "providers" => Some(Self::Providers),
            "session" => Some(Self::Session),
            "csrf" => Some(Self::Csrf),
            "signin" => Some(Self::SignIn),
            "signout" => Some(Self::SignOut),
            "callback" => Some(Self::Callback),
            "verify-request" => Some(Self::VerifyRequest),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Actions that return machine-readable JSON rather than driving a
    /// browser flow. Errors for these render as JSON, not redirects.
    pub(crate) fn is_api(&self) -> bool {
        matches!(self, Self::Providers | Self::Session | Self::Csrf)
    }
}

/// The framework-agnostic view of an inbound request.
#[derive(Debug, Clone)]
pub struct RequestInternal {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Cookie pairs in header order. Chunk reassembly deliberately does not
    /// rely on this order.
    pub cookies: Vec<(String, String)>,
    pub query: HashMap<String, String>,
    /// Parsed JSON or form body, always a JSON object when present.
    pub body: Option<Map<String, Value>>,
    pub action: Action,
    pub provider_id: Option<String>,
}

impl RequestInternal {
    /// Normalize an inbound request. `base_path` is the configured route
    /// prefix (default `/api/auth`); anything outside it, or an unknown
    /// action segment, is rejected with `UnknownAction`.
    pub fn new(
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<&str>,
        base_path: &str,
    ) -> Result<Self, AuthError> {
        let (action, provider_id) = parse_action_path(url.path(), base_path)?;

        let query: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let cookies = parse_cookie_header(&headers);
        let body = parse_body(&headers, body);

        Ok(Self {
            method,
            url,
            headers,
            cookies,
            query,
            body,
            action,
            provider_id,
        })
    }

    /// First cookie with the given name, header order.
    pub(crate) fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub(crate) fn body_field(&self, name: &str) -> Option<&str> {
        self.body.as_ref()?.get(name)?.as_str()
    }

    /// Query parameter with body fallback; OAuth `form_post` responses carry
    /// `code`/`state` in the body instead of the query string.
    pub(crate) fn param(&self, name: &str) -> Option<&str> {
        self.query_param(name).or_else(|| self.body_field(name))
    }

    /// The CSRF token submitted with a state-mutating request, from the body
    /// field, the query string, or the `X-CSRF-Token` header.
    pub(crate) fn submitted_csrf_token(&self) -> Option<&str> {
        self.body_field("csrfToken")
            .or_else(|| self.query_param("csrfToken"))
            .or_else(|| {
                self.headers
                    .get("X-CSRF-Token")
                    .and_then(|h| h.to_str().ok())
            })
    }
}

fn parse_action_path(path: &str, base_path: &str) -> Result<(Action, Option<String>), AuthError> {
    let base = base_path.trim_end_matches('/');
    let rest = path
        .strip_prefix(base)
        .ok_or_else(|| AuthError::UnknownAction(path.to_string()))?;

    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let action_segment = segments
        .next()
        .ok_or_else(|| AuthError::UnknownAction(path.to_string()))?;
    let action = Action::parse(action_segment)
        .ok_or_else(|| AuthError::UnknownAction(action_segment.to_string()))?;
    let provider_id = segments.next().map(|s| s.to_string());

    if segments.next().is_some() {
        return Err(AuthError::UnknownAction(path.to_string()));
    }
    Ok((action, provider_id))
}

fn parse_cookie_header(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut cookies = Vec::new();
    for header in headers.get_all(COOKIE) {
        let Ok(header) = header.to_str() else {
            tracing::debug!("Skipping non-UTF8 cookie header");
            continue;
        };
        for pair in header.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
                let value = urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                cookies.push((name.to_string(), value));
            }
        }
    }
    cookies
}

fn parse_body(headers: &HeaderMap, body: Option<&str>) -> Option<Map<String, Value>> {
    let body = body?;
    if body.is_empty() {
        return None;
    }
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/json") {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => Some(map),
            _ => {
                tracing::debug!("Request body is not a JSON object, ignoring");
                None
            }
        }
    } else {
        // Treat anything else as a form submission.
        let map: Map<String, Value> = url::form_urlencoded::parse(body.as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        if map.is_empty() { None } else { Some(map) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn request(path: &str) -> Result<RequestInternal, AuthError> {
        let url = Url::parse(&format!("https://app.example{path}")).unwrap();
        RequestInternal::new(Method::GET, url, HeaderMap::new(), None, "/api/auth")
    }

    #[test]
    fn test_parse_action_and_provider() {
        let req = request("/api/auth/signin/github").unwrap();
        assert_eq!(req.action, Action::SignIn);
        assert_eq!(req.provider_id.as_deref(), Some("github"));

        let req = request("/api/auth/session").unwrap();
        assert_eq!(req.action, Action::Session);
        assert!(req.provider_id.is_none());

        let req = request("/api/auth/verify-request").unwrap();
        assert_eq!(req.action, Action::VerifyRequest);
    }

    #[test]
    fn test_unknown_action_rejected() {
        match request("/api/auth/unknown") {
            Err(AuthError::UnknownAction(segment)) => assert_eq!(segment, "unknown"),
            other => panic!("Expected UnknownAction, got {other:?}"),
        }
        assert!(matches!(
            request("/other/path"),
            Err(AuthError::UnknownAction(_))
        ));
        assert!(matches!(
            request("/api/auth/signin/github/extra"),
            Err(AuthError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_cookie_parsing_preserves_duplicates_and_decodes() {
        let mut headers = HeaderMap::new();
        headers.append(
            COOKIE,
            HeaderValue::from_static("a=1; b=with%20space; a=2"),
        );
        let cookies = parse_cookie_header(&headers);
        assert_eq!(
            cookies,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "with space".to_string()),
                ("a".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_form_body_and_csrf_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let url = Url::parse("https://app.example/api/auth/signout").unwrap();
        let req = RequestInternal::new(
            Method::POST,
            url,
            headers,
            Some("csrfToken=tok123&callbackUrl=%2Fdashboard"),
            "/api/auth",
        )
        .unwrap();
        assert_eq!(req.submitted_csrf_token(), Some("tok123"));
        assert_eq!(req.body_field("callbackUrl"), Some("/dashboard"));
    }

    #[test]
    fn test_json_body_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let url = Url::parse("https://app.example/api/auth/signin/email").unwrap();
        let req = RequestInternal::new(
            Method::POST,
            url,
            headers,
            Some(r#"{"email":"user@example.com","csrfToken":"t"}"#),
            "/api/auth",
        )
        .unwrap();
        assert_eq!(req.body_field("email"), Some("user@example.com"));
    }

    #[test]
    fn test_param_prefers_query_then_body() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let url = Url::parse("https://app.example/api/auth/callback/acme?state=from_query").unwrap();
        let req =
            RequestInternal::new(Method::POST, url, headers, Some("code=from_body"), "/api/auth")
                .unwrap();
        assert_eq!(req.param("state"), Some("from_query"));
        assert_eq!(req.param("code"), Some("from_body"));
    }
}
