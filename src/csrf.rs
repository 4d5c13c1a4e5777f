//! Double-submit CSRF token manager.
//!
//! The CSRF cookie holds `token|sha256(token + secret)`. A state-mutating
//! request must submit the bare token (form field, query or header); it is
//! compared against the cookie token in constant time before any
//! provider-specific logic runs.

use subtle::ConstantTimeEq;

use crate::errors::AuthError;
use crate::utils::{UtilError, gen_random_string, sha256_hex};

pub(crate) struct CsrfTokenPair {
    /// The bare token handed to the client in the `csrf` action body.
    pub token: String,
    /// `token|hash` stored in the CSRF cookie.
    pub cookie_value: String,
}

pub(crate) fn create_csrf_token(secret: &str) -> Result<CsrfTokenPair, UtilError> {
    let token = gen_random_string(32)?;
    let hash = sha256_hex(&format!("{token}{secret}"));
    let cookie_value = format!("{token}|{hash}");
    Ok(CsrfTokenPair {
        token,
        cookie_value,
    })
}

/// Extract the token from a `token|hash` cookie value, verifying the hash.
/// Returns `None` for malformed or tampered cookies.
pub(crate) fn parse_csrf_cookie(value: &str, secret: &str) -> Option<String> {
    let (token, hash) = value.split_once('|')?;
    let expected = sha256_hex(&format!("{token}{secret}"));
    bool::from(expected.as_bytes().ct_eq(hash.as_bytes())).then(|| token.to_string())
}

/// Validate a state-mutating submission: the cookie must be well-formed and
/// the submitted token must match it. Returns the verified token.
pub(crate) fn verify_csrf_submission(
    cookie_value: Option<&str>,
    submitted: Option<&str>,
    secret: &str,
) -> Result<String, AuthError> {
    let cookie_value = cookie_value.ok_or(AuthError::MissingCsrf)?;
    let token = parse_csrf_cookie(cookie_value, secret).ok_or(AuthError::MissingCsrf)?;
    let submitted = submitted.ok_or(AuthError::MissingCsrf)?;
    if bool::from(token.as_bytes().ct_eq(submitted.as_bytes())) {
        Ok(token)
    } else {
        tracing::debug!("CSRF token mismatch");
        Err(AuthError::MissingCsrf)
    }
}
