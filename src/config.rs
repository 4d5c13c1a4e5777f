//! Engine configuration.
//!
//! All behavior is driven by one explicit, immutable [`AuthConfig`] value
//! built at startup. Nothing is read from the process environment at request
//! time; [`AuthConfig::from_env`] exists as a convenience constructor that
//! reads the conventional variables once and then behaves like any other
//! config.

use std::env;
use std::sync::Arc;

use url::Url;

use crate::adapter::Adapter;
use crate::callbacks::{Callbacks, Events};
use crate::cookie::CookieSettings;
use crate::errors::AuthError;
use crate::oauth2::{OAuthHttp, ReqwestHttp};
use crate::providers::Provider;
use crate::request::RequestInternal;

/// How an authenticated session is represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStrategy {
    /// Stateless signed JWT in the session cookie.
    Jwt,
    /// Opaque token in the cookie, session record in the adapter.
    Database,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub strategy: SessionStrategy,
    /// Session lifetime in seconds (default 30 days).
    pub max_age: i64,
    /// Database sessions: minimum seconds between expiry extensions.
    pub update_age: i64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            strategy: SessionStrategy::Jwt,
            max_age: 30 * 24 * 60 * 60,
            update_age: 24 * 60 * 60,
        }
    }
}

/// Overrides for the built-in HTML pages. Each entry is a URL (absolute or
/// origin-relative) the engine redirects to instead of rendering its own.
#[derive(Debug, Clone, Default)]
pub struct PagesOptions {
    pub sign_in: Option<String>,
    pub error: Option<String>,
    pub verify_request: Option<String>,
}

#[derive(Clone)]
pub struct AuthConfig {
    /// Canonical public URL of the deployment, e.g. `https://app.example`.
    pub base_url: Url,
    /// Route prefix the engine is mounted under (default `/api/auth`).
    pub base_path: String,
    pub secret: String,
    pub providers: Vec<Provider>,
    pub session: SessionOptions,
    pub cookies: CookieSettings,
    pub callbacks: Callbacks,
    pub events: Events,
    pub adapter: Option<Arc<dyn Adapter>>,
    /// Honor forwarded host headers when resolving redirect targets, for
    /// deployments behind a proxy serving several hostnames. Off by
    /// default; absolute URLs then always derive from `base_url`.
    pub trust_host: bool,
    pub pages: PagesOptions,
    /// Outbound transport for token, userinfo and JWKS requests.
    pub http: Arc<dyn OAuthHttp>,
}

impl AuthConfig {
    /// Build a configuration with defaults for everything optional. The
    /// cookie security posture follows the scheme of `base_url`.
    ///
    /// # Errors
    ///
    /// Rejects a secret shorter than 32 characters, an empty or duplicate
    /// provider list, and a non-absolute `base_url`.
    pub fn new(
        base_url: Url,
        secret: impl Into<String>,
        providers: Vec<Provider>,
    ) -> Result<Self, AuthError> {
        let secret = secret.into();
        let secure = base_url.scheme() == "https";
        let config = Self {
            base_url,
            base_path: "/api/auth".to_string(),
            secret,
            providers,
            session: SessionOptions::default(),
            cookies: CookieSettings::new(secure),
            callbacks: Callbacks::default(),
            events: Events::default(),
            adapter: None,
            trust_host: false,
            pages: PagesOptions::default(),
            http: Arc::new(ReqwestHttp::new()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Read `AUTH_URL`, `AUTH_SECRET` and `AUTH_TRUST_HOST` (via a `.env`
    /// file when present) and build the configuration from them.
    pub fn from_env(providers: Vec<Provider>) -> Result<Self, AuthError> {
        dotenvy::dotenv().ok();

        let base_url = env::var("AUTH_URL")
            .map_err(|_| AuthError::Configuration("AUTH_URL must be set".to_string()))?;
        let base_url = Url::parse(&base_url)
            .map_err(|e| AuthError::Configuration(format!("AUTH_URL is not a valid URL: {e}")))?;
        let secret = env::var("AUTH_SECRET")
            .map_err(|_| AuthError::Configuration("AUTH_SECRET must be set".to_string()))?;
        let trust_host = env::var("AUTH_TRUST_HOST")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let mut config = Self::new(base_url, secret, providers)?;
        config.trust_host = trust_host;
        Ok(config)
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_session(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }

    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_events(mut self, events: Events) -> Self {
        self.events = events;
        self
    }

    pub fn with_pages(mut self, pages: PagesOptions) -> Self {
        self.pages = pages;
        self
    }

    /// Mount the engine under a different route prefix. A missing leading
    /// slash and any trailing slash are normalized away.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        let base_path = base_path.into();
        let trimmed = base_path.trim_end_matches('/');
        self.base_path = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        self
    }

    pub fn with_http(mut self, http: Arc<dyn OAuthHttp>) -> Self {
        self.http = http;
        self
    }

    pub fn with_trust_host(mut self, trust_host: bool) -> Self {
        self.trust_host = trust_host;
        self
    }

    /// Re-check the invariants after builder-style mutation.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.secret.len() < 32 {
            return Err(AuthError::Configuration(
                "secret must be at least 32 characters".to_string(),
            ));
        }
        if self.providers.is_empty() {
            return Err(AuthError::Configuration(
                "at least one provider must be configured".to_string(),
            ));
        }
        for (i, provider) in self.providers.iter().enumerate() {
            if self.providers[..i].iter().any(|p| p.id() == provider.id()) {
                return Err(AuthError::Configuration(format!(
                    "duplicate provider id: {}",
                    provider.id()
                )));
            }
        }
        if self.base_url.cannot_be_a_base() {
            return Err(AuthError::Configuration(
                "base_url must be an absolute http(s) URL".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL for one request. With `trust_host`, the forwarded host
    /// header (falling back to `Host`) overrides the configured host, so
    /// redirect clamping follows the origin the browser actually hit. The
    /// redirect URIs registered with providers always derive from
    /// `base_url`.
    pub(crate) fn request_base_url(&self, request: &RequestInternal) -> Url {
        if !self.trust_host {
            return self.base_url.clone();
        }
        let host = request
            .headers
            .get("x-forwarded-host")
            .or_else(|| request.headers.get(http::header::HOST))
            .and_then(|h| h.to_str().ok());
        let Some(host) = host else {
            return self.base_url.clone();
        };
        let scheme = request
            .headers
            .get("x-forwarded-proto")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_else(|| self.base_url.scheme());
        match Url::parse(&format!("{scheme}://{host}{}", self.base_url.path())) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparseable forwarded host");
                self.base_url.clone()
            }
        }
    }

    /// `scheme://host[:port]` of the deployment, no trailing slash.
    pub fn origin(&self) -> String {
        self.base_url.origin().ascii_serialization()
    }

    /// Absolute URL of an engine action, e.g. `api_url("session")`.
    pub fn api_url(&self, suffix: &str) -> String {
        format!("{}{}/{suffix}", self.origin(), self.base_path)
    }

    /// The redirect URI registered with an OAuth provider.
    pub fn callback_url(&self, provider_id: &str) -> String {
        self.api_url(&format!("callback/{provider_id}"))
    }

    /// Where to send the browser on an error, honoring the page override.
    pub(crate) fn error_page_url(&self, kind: &str) -> String {
        let base = self
            .pages
            .error
            .clone()
            .unwrap_or_else(|| self.api_url("error"));
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{base}{separator}error={}", urlencoding::encode(kind))
    }

    pub(crate) fn signin_page_url(&self) -> Option<&str> {
        self.pages.sign_in.as_deref()
    }

    pub(crate) fn verify_request_url(&self, provider_id: &str) -> String {
        let base = self
            .pages
            .verify_request
            .clone()
            .unwrap_or_else(|| self.api_url("verify-request"));
        let separator = if base.contains('?') { '&' } else { '?' };
        format!(
            "{base}{separator}provider={}&type=email",
            urlencoding::encode(provider_id)
        )
    }
}
