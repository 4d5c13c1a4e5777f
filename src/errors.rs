//! Error taxonomy for the authentication engine.
//!
//! Each concern keeps its own `thiserror` enum (`OAuth2Error`, `JwtError`,
//! `AdapterError`, ...) and everything converges into [`AuthError`] at the
//! router boundary, where the error is logged and converted into a redirect
//! to the error page. A raw error never reaches the transport layer for a
//! user-facing flow.

use thiserror::Error;

use crate::adapter::AdapterError;
use crate::email::EmailError;
use crate::jwt::JwtError;
use crate::oauth2::OAuth2Error;
use crate::utils::UtilError;

#[derive(Debug, Error)]
pub enum AuthError {
    /// A state/pkce/nonce check value was missing or did not match.
    #[error("Invalid check: {0}")]
    InvalidCheck(String),

    /// Token exchange, ID-token verification or userinfo fetch failed.
    #[error("OAuth callback error: {0}")]
    OAuthCallback(String),

    /// The user `signIn` callback rejected the sign-in attempt.
    #[error("Access denied")]
    AccessDenied,

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The double-submit CSRF token was absent or did not match the cookie.
    #[error("Missing or invalid CSRF token")]
    MissingCsrf,

    /// The e-mail already belongs to a user signed up via another provider.
    #[error("Account not linked")]
    AccountNotLinked,

    #[error("Failed to create verification token: {0}")]
    CreateVerificationToken(String),

    /// The verification token was unknown, already used, or expired.
    #[error("Verification token invalid or expired")]
    Verification,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Email sign-in error: {0}")]
    EmailSignIn(String),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Session token error: {0}")]
    Jwt(#[from] JwtError),

    #[error("Utils error: {0}")]
    Utils(#[from] UtilError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable error code carried in the error-page query string
    /// (`{basePath}/error?error=<kind>`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCheck(_) => "InvalidCheck",
            Self::OAuthCallback(_) => "OAuthCallbackError",
            Self::AccessDenied => "AccessDenied",
            Self::Configuration(_) => "Configuration",
            Self::MissingCsrf => "MissingCSRF",
            Self::AccountNotLinked => "AccountNotLinked",
            Self::CreateVerificationToken(_) => "CreateVerificationTokenError",
            Self::Verification => "Verification",
            Self::UnknownAction(_) => "UnknownAction",
            Self::UnknownProvider(_) => "UnknownProvider",
            Self::EmailSignIn(_) => "EmailSignInError",
            Self::Adapter(_) => "AdapterError",
            Self::Jwt(_) => "SessionTokenError",
            Self::Utils(_) | Self::Internal(_) => "InternalError",
        }
    }

    /// Log the error and return self, allowing method chaining at the point
    /// where a flow is aborted.
    pub fn log(self) -> Self {
        tracing::error!(kind = self.kind(), error = %self, "authentication flow failed");
        self
    }
}

impl From<OAuth2Error> for AuthError {
    fn from(e: OAuth2Error) -> Self {
        match &e {
            OAuth2Error::SecurityTokenNotFound(_)
            | OAuth2Error::StateMismatch
            | OAuth2Error::NonceMismatch
            | OAuth2Error::DecodeState(_) => Self::InvalidCheck(e.to_string()),
            _ => Self::OAuthCallback(e.to_string()),
        }
    }
}

impl From<EmailError> for AuthError {
    fn from(e: EmailError) -> Self {
        Self::EmailSignIn(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_errors_map_to_invalid_check() {
        let err: AuthError = OAuth2Error::StateMismatch.into();
        assert_eq!(err.kind(), "InvalidCheck");

        let err: AuthError = OAuth2Error::DecodeState("bad origin".into()).into();
        assert_eq!(err.kind(), "InvalidCheck");

        let err: AuthError = OAuth2Error::TokenExchange("boom".into()).into();
        assert_eq!(err.kind(), "OAuthCallbackError");
    }

    #[test]
    fn test_kind_is_query_safe() {
        let kinds = [
            AuthError::AccessDenied.kind(),
            AuthError::MissingCsrf.kind(),
            AuthError::Verification.kind(),
        ];
        for kind in kinds {
            assert!(kind.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }
}
