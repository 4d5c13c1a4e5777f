//! Generic response half of the HTTP boundary.
//!
//! Every flow handler produces a [`ResponseInternal`]; the framework adapter
//! converts it to its native response type, either field by field or through
//! [`ResponseInternal::into_http`].

use http::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, LOCATION, PRAGMA, SET_COOKIE};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::Value;

use crate::errors::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub path: String,
    pub same_site: SameSite,
    pub max_age: Option<i64>,
    pub domain: Option<String>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: false,
            path: "/".to_string(),
            same_site: SameSite::Lax,
            max_age: None,
            domain: None,
        }
    }
}

/// One line item destined for a `Set-Cookie` header.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub options: CookieOptions,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            options,
        }
    }

    /// A zero-max-age cookie that instructs the browser to drop `name`.
    pub(crate) fn expired(name: impl Into<String>, options: &CookieOptions) -> Self {
        let mut options = options.clone();
        options.max_age = Some(0);
        Self {
            name: name.into(),
            value: String::new(),
            options,
        }
    }

    /// Serialize to the `Set-Cookie` header value. The cookie value is
    /// percent-encoded; the request parser reverses this.
    pub fn to_header_value(&self) -> String {
        let mut out = format!(
            "{}={}; Path={}; SameSite={}",
            self.name,
            urlencoding::encode(&self.value),
            self.options.path,
            self.options.same_site.as_str()
        );
        if let Some(domain) = &self.options.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.options.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.options.http_only {
            out.push_str("; HttpOnly");
        }
        if self.options.secure {
            out.push_str("; Secure");
        }
        out
    }
}

#[derive(Debug, Clone)]
pub enum Body {
    Json(Value),
    Html(String),
}

/// The generic output of every flow handler: `{status, redirect?, cookies,
/// headers, body?}`, later translated to a native response by the adapter.
#[derive(Debug)]
pub struct ResponseInternal {
    pub status: StatusCode,
    pub redirect: Option<String>,
    pub cookies: Vec<Cookie>,
    pub headers: HeaderMap,
    pub body: Option<Body>,
}

impl ResponseInternal {
    pub fn json(status: StatusCode, value: Value) -> Self {
        Self {
            status,
            redirect: None,
            cookies: Vec::new(),
            headers: HeaderMap::new(),
            body: Some(Body::Json(value)),
        }
    }

    pub fn html(status: StatusCode, markup: impl Into<String>) -> Self {
        Self {
            status,
            redirect: None,
            cookies: Vec::new(),
            headers: HeaderMap::new(),
            body: Some(Body::Html(markup.into())),
        }
    }

    pub fn redirect(url: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FOUND,
            redirect: Some(url.into()),
            cookies: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_cookies(mut self, cookies: Vec<Cookie>) -> Self {
        self.cookies.extend(cookies);
        self
    }

    /// Mark the response as uncacheable (used by the `csrf` action).
    pub(crate) fn no_store(mut self) -> Self {
        self.headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("private, no-cache, no-store"),
        );
        self.headers.insert(EXPIRES, HeaderValue::from_static("0"));
        self.headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        self
    }

    /// Assemble a generic `http::Response`. Framework adapters that work with
    /// `http` types can consume this directly.
    pub fn into_http(self) -> Result<http::Response<String>, AuthError> {
        let mut builder = http::Response::builder().status(self.status);

        if let Some(location) = &self.redirect {
            builder = builder.header(
                LOCATION,
                HeaderValue::from_str(location)
                    .map_err(|e| AuthError::Internal(format!("invalid redirect target: {e}")))?,
            );
        }
        for (name, value) in self.headers.iter() {
            builder = builder.header(name, value);
        }
        for cookie in &self.cookies {
            builder = builder.header(
                SET_COOKIE,
                HeaderValue::from_str(&cookie.to_header_value())
                    .map_err(|e| AuthError::Internal(format!("invalid cookie: {e}")))?,
            );
        }

        let (content_type, body) = match self.body {
            Some(Body::Json(value)) => ("application/json; charset=utf-8", value.to_string()),
            Some(Body::Html(markup)) => ("text/html; charset=utf-8", markup),
            None => ("text/plain; charset=utf-8", String::new()),
        };
        builder
            .header(CONTENT_TYPE, HeaderValue::from_static(content_type))
            .body(body)
            .map_err(|e| AuthError::Internal(format!("failed to assemble response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cookie_header_value_attributes() {
        let cookie = Cookie::new(
            "__Host-authcore.csrf-token",
            "abc|def",
            CookieOptions {
                secure: true,
                max_age: Some(900),
                ..CookieOptions::default()
            },
        );
        let header = cookie.to_header_value();
        assert!(header.starts_with("__Host-authcore.csrf-token=abc%7Cdef"));
        assert!(header.contains("; Path=/"));
        assert!(header.contains("; SameSite=Lax"));
        assert!(header.contains("; Max-Age=900"));
        assert!(header.contains("; HttpOnly"));
        assert!(header.contains("; Secure"));
    }

    #[test]
    fn test_expired_cookie_has_zero_max_age() {
        let cookie = Cookie::expired("authcore.state", &CookieOptions::default());
        assert_eq!(cookie.options.max_age, Some(0));
        assert!(cookie.value.is_empty());
    }

    #[test]
    fn test_into_http_redirect_and_cookies() {
        let resp = ResponseInternal::redirect("https://app.example/dashboard")
            .with_cookies(vec![Cookie::new("a", "1", CookieOptions::default())])
            .into_http()
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(LOCATION).unwrap(),
            "https://app.example/dashboard"
        );
        assert!(resp.headers().get(SET_COOKIE).is_some());
    }

    #[test]
    fn test_json_body_serialization() {
        let resp = ResponseInternal::json(StatusCode::OK, json!({"csrfToken": "t"}))
            .no_store()
            .into_http()
            .unwrap();
        assert_eq!(resp.body(), "{\"csrfToken\":\"t\"}");
        assert_eq!(
            resp.headers().get(CACHE_CONTROL).unwrap(),
            "private, no-cache, no-store"
        );
    }
}
