//! Provider descriptors and resolution.
//!
//! Providers are a closed tagged union built by plain constructor functions;
//! the declarative descriptor (endpoints, checks, profile mapping) is
//! configuration data the protocol state machine consumes. Provider-specific
//! quirks beyond the generic OAuth2/OIDC contract stay out of the core.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::email::EmailError;
use crate::errors::AuthError;

/// Normalized user shape produced by `profile()` mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
}

/// Anti-CSRF/anti-replay checks a provider requires on its OAuth flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Pkce,
    State,
    Nonce,
    /// Provider performs no checks (discouraged; some legacy providers).
    None,
}

/// Maps the raw provider payload (ID-token claims or userinfo JSON) to the
/// normalized user shape.
pub type ProfileFn = Arc<dyn Fn(&Value) -> Result<UserProfile, String> + Send + Sync>;

/// Credentials `authorize`: `Ok(None)` means the credentials were rejected.
pub type AuthorizeFn = Arc<
    dyn Fn(
            Map<String, Value>,
        ) -> Pin<Box<dyn Future<Output = Result<Option<UserProfile>, String>> + Send>>
        + Send
        + Sync,
>;

/// Everything an email provider needs to deliver one sign-in link/code.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub identifier: String,
    /// Full verification URL embedding the unhashed token.
    pub url: String,
    /// The unhashed token (for OTP-style delivery that shows the code).
    pub token: String,
    pub expires: DateTime<Utc>,
    pub provider_id: String,
}

pub type SendVerificationFn = Arc<
    dyn Fn(VerificationRequest) -> Pin<Box<dyn Future<Output = Result<(), EmailError>> + Send>>
        + Send
        + Sync,
>;

/// Custom token generator for the OTP variant (e.g. a 6-digit code).
pub type GenerateTokenFn = Arc<dyn Fn() -> String + Send + Sync>;

/// OAuth2/OIDC provider descriptor. For plain OAuth2 the userinfo endpoint
/// is the profile source; for OIDC the verified ID token is.
#[derive(Clone)]
pub struct OAuthProvider {
    pub id: String,
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorization_endpoint: Url,
    /// Static params appended to the authorization URL (scope etc.).
    pub authorization_params: Vec<(String, String)>,
    pub token_endpoint: Url,
    pub userinfo_endpoint: Option<Url>,
    pub issuer: Option<String>,
    pub jwks_endpoint: Option<Url>,
    pub checks: Vec<Check>,
    pub profile: ProfileFn,
    /// When set, this fixed trusted redirect URI fronts the flow and the
    /// `state` parameter is wrapped with the true origin.
    pub redirect_proxy_url: Option<Url>,
}

impl OAuthProvider {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authorization_endpoint: Url,
        token_endpoint: Url,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorization_endpoint,
            authorization_params: vec![("scope".to_string(), "openid email profile".to_string())],
            token_endpoint,
            userinfo_endpoint: None,
            issuer: None,
            jwks_endpoint: None,
            checks: vec![Check::Pkce, Check::State],
            profile: Arc::new(default_profile),
            redirect_proxy_url: None,
        }
    }

    pub fn with_userinfo(mut self, endpoint: Url) -> Self {
        self.userinfo_endpoint = Some(endpoint);
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>, jwks_endpoint: Url) -> Self {
        self.issuer = Some(issuer.into());
        self.jwks_endpoint = Some(jwks_endpoint);
        self
    }

    pub fn with_checks(mut self, checks: Vec<Check>) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.authorization_params = params;
        self
    }

    pub fn with_profile(mut self, profile: ProfileFn) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_redirect_proxy(mut self, proxy_url: Url) -> Self {
        self.redirect_proxy_url = Some(proxy_url);
        self
    }

    pub(crate) fn has_check(&self, check: Check) -> bool {
        self.checks.contains(&check)
    }
}

/// Default `profile()`: standard OIDC claim names with OAuth2 fallbacks.
pub fn default_profile(payload: &Value) -> Result<UserProfile, String> {
    let id = payload
        .get("sub")
        .or_else(|| payload.get("id"))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .ok_or_else(|| "profile payload has neither `sub` nor `id`".to_string())?;
    let text = |key: &str| payload.get(key).and_then(Value::as_str).map(String::from);
    Ok(UserProfile {
        id,
        name: text("name").or_else(|| text("login")),
        email: text("email"),
        image: text("picture").or_else(|| text("avatar_url")),
    })
}

#[derive(Clone)]
pub struct EmailProvider {
    pub id: String,
    pub name: String,
    /// Verification token lifetime in seconds (default 24 h).
    pub max_age: i64,
    pub send_verification_request: SendVerificationFn,
    pub generate_token: Option<GenerateTokenFn>,
}

impl EmailProvider {
    pub fn new(send_verification_request: SendVerificationFn) -> Self {
        Self {
            id: "email".to_string(),
            name: "Email".to_string(),
            max_age: 24 * 60 * 60,
            send_verification_request,
            generate_token: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.id = id.into();
        self.name = name.into();
        self
    }

    pub fn with_max_age(mut self, max_age: i64) -> Self {
        self.max_age = max_age;
        self
    }

    /// OTP variant: supply a generator for fixed-format codes.
    pub fn with_generate_token(mut self, generate: GenerateTokenFn) -> Self {
        self.generate_token = Some(generate);
        self
    }
}

#[derive(Clone)]
pub struct CredentialsProvider {
    pub id: String,
    pub name: String,
    pub authorize: AuthorizeFn,
}

impl CredentialsProvider {
    pub fn new(authorize: AuthorizeFn) -> Self {
        Self {
            id: "credentials".to_string(),
            name: "Credentials".to_string(),
            authorize,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.id = id.into();
        self.name = name.into();
        self
    }
}

/// Descriptor only: the WebAuthn ceremony itself lives outside the protocol
/// core, behind its own registration/authentication endpoints.
#[derive(Debug, Clone)]
pub struct WebAuthnProvider {
    pub id: String,
    pub name: String,
    pub relying_party_id: String,
    pub relying_party_name: String,
}

#[derive(Clone)]
pub enum Provider {
    OAuth(OAuthProvider),
    Oidc(OAuthProvider),
    Email(EmailProvider),
    Credentials(CredentialsProvider),
    WebAuthn(WebAuthnProvider),
}

impl Provider {
    pub fn id(&self) -> &str {
        match self {
            Self::OAuth(p) | Self::Oidc(p) => &p.id,
            Self::Email(p) => &p.id,
            Self::Credentials(p) => &p.id,
            Self::WebAuthn(p) => &p.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::OAuth(p) | Self::Oidc(p) => &p.name,
            Self::Email(p) => &p.name,
            Self::Credentials(p) => &p.name,
            Self::WebAuthn(p) => &p.name,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::OAuth(_) => "oauth",
            Self::Oidc(_) => "oidc",
            Self::Email(_) => "email",
            Self::Credentials(_) => "credentials",
            Self::WebAuthn(_) => "webauthn",
        }
    }
}

/// Public provider metadata served by `GET /providers`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    pub signin_url: String,
    pub callback_url: String,
}

/// Look up a configured provider by the id parsed from the URL path.
pub(crate) fn resolve<'a>(
    providers: &'a [Provider],
    provider_id: Option<&str>,
) -> Result<&'a Provider, AuthError> {
    let provider_id =
        provider_id.ok_or_else(|| AuthError::UnknownProvider("<missing>".to_string()))?;
    providers
        .iter()
        .find(|p| p.id() == provider_id)
        .ok_or_else(|| AuthError::UnknownProvider(provider_id.to_string()))
}
