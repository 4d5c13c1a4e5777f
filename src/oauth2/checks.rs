//! The `state`, `pkce` and `nonce` check encoders.
//!
//! Each check generates a value at sign-in, stores it in a short-lived
//! signed cookie, and validates it against the incoming callback. Opening a
//! check always queues a zero-max-age cleanup cookie first, so the cookie is
//! cleared on success and failure alike and a callback URL cannot be
//! replayed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::OAuth2Error;
use crate::config::AuthConfig;
use crate::cookie::CookieTemplate;
use crate::jwt::{decode_jwt, encode_jwt};
use crate::request::RequestInternal;
use crate::response::Cookie;
use crate::utils::{base64url_decode, base64url_encode, gen_random_string};

/// Fixed lifetime for all check cookies.
pub(crate) const CHECK_COOKIE_MAX_AGE: i64 = 15 * 60;

/// A check: the value travels in the authorization URL, the cookie carries
/// the signed comparison value.
pub(crate) struct CheckValue {
    pub(crate) value: String,
    pub(crate) cookie: Cookie,
}

fn seal_check(
    value: &str,
    template: &CookieTemplate,
    secret: &str,
) -> Result<Cookie, OAuth2Error> {
    let mut claims = Map::new();
    claims.insert("value".to_string(), json!(value));
    let token = encode_jwt(claims, secret, &template.name, CHECK_COOKIE_MAX_AGE)
        .map_err(|e| OAuth2Error::Crypto(e.to_string()))?;
    let mut options = template.options.clone();
    options.max_age = Some(CHECK_COOKIE_MAX_AGE);
    Ok(Cookie::new(&template.name, token, options))
}

/// Retrieve and consume a check cookie. The cleanup cookie is queued before
/// any validation so the check is single-use regardless of outcome.
fn open_check(
    request: &RequestInternal,
    template: &CookieTemplate,
    secret: &str,
    cleanup: &mut Vec<Cookie>,
) -> Result<String, OAuth2Error> {
    let raw = request.cookie(&template.name).ok_or_else(|| {
        OAuth2Error::SecurityTokenNotFound(format!("missing {} cookie", template.name))
    })?;
    cleanup.push(Cookie::expired(&template.name, &template.options));

    let claims = decode_jwt(raw, secret, &template.name).map_err(|e| {
        OAuth2Error::SecurityTokenNotFound(format!("invalid {} cookie: {e}", template.name))
    })?;
    claims
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            OAuth2Error::SecurityTokenNotFound(format!("malformed {} cookie", template.name))
        })
}

/// Payload of a redirect-proxy wrapped `state` parameter: the random check
/// value plus the origin the callback must be forwarded to.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ProxyState {
    pub(crate) random: String,
    pub(crate) origin: String,
}

pub(crate) fn wrap_proxy_state(random: &str, origin: &str) -> Result<String, OAuth2Error> {
    let json = serde_json::to_string(&ProxyState {
        random: random.to_string(),
        origin: origin.to_string(),
    })
    .map_err(|e| OAuth2Error::Serde(e.to_string()))?;
    Ok(base64url_encode(json))
}

/// Decode a possibly-wrapped `state` parameter. Plain random states decode
/// to `None`.
pub(crate) fn unwrap_proxy_state(state: &str) -> Option<ProxyState> {
    let bytes = base64url_decode(state).ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub(crate) fn create_state(
    config: &AuthConfig,
    proxy_origin: Option<&str>,
) -> Result<CheckValue, OAuth2Error> {
    let random = gen_random_string(32).map_err(|e| OAuth2Error::Crypto(e.to_string()))?;
    let value = match proxy_origin {
        Some(origin) => wrap_proxy_state(&random, origin)?,
        None => random,
    };
    let cookie = seal_check(&value, &config.cookies.state, &config.secret)?;
    Ok(CheckValue { value, cookie })
}

/// Validate the callback `state` against the stored cookie. The comparison
/// covers the full (possibly wrapped) value, so a proxy-forwarded state
/// still has to match bit for bit at the true origin.
pub(crate) fn use_state(
    request: &RequestInternal,
    config: &AuthConfig,
    cleanup: &mut Vec<Cookie>,
) -> Result<(), OAuth2Error> {
    let state_param = request.param("state").ok_or_else(|| {
        OAuth2Error::SecurityTokenNotFound("state parameter missing from callback".to_string())
    })?;
    let stored = open_check(request, &config.cookies.state, &config.secret, cleanup)?;
    if bool::from(stored.as_bytes().ct_eq(state_param.as_bytes())) {
        Ok(())
    } else {
        Err(OAuth2Error::StateMismatch)
    }
}

/// Generate the PKCE verifier/challenge pair. The S256 challenge goes into
/// the authorization URL; the verifier is sealed in the cookie for the token
/// exchange.
pub(crate) fn create_pkce(config: &AuthConfig) -> Result<(String, CheckValue), OAuth2Error> {
    let verifier = gen_random_string(32).map_err(|e| OAuth2Error::Crypto(e.to_string()))?;
    let challenge = base64url_encode(Sha256::digest(verifier.as_bytes()));
    let cookie = seal_check(&verifier, &config.cookies.pkce_code_verifier, &config.secret)?;
    Ok((
        challenge,
        CheckValue {
            value: verifier,
            cookie,
        },
    ))
}

pub(crate) fn use_pkce(
    request: &RequestInternal,
    config: &AuthConfig,
    cleanup: &mut Vec<Cookie>,
) -> Result<String, OAuth2Error> {
    open_check(request, &config.cookies.pkce_code_verifier, &config.secret, cleanup)
}

pub(crate) fn create_nonce(config: &AuthConfig) -> Result<CheckValue, OAuth2Error> {
    let value = gen_random_string(32).map_err(|e| OAuth2Error::Crypto(e.to_string()))?;
    let cookie = seal_check(&value, &config.cookies.nonce, &config.secret)?;
    Ok(CheckValue { value, cookie })
}

pub(crate) fn use_nonce(
    request: &RequestInternal,
    config: &AuthConfig,
    cleanup: &mut Vec<Cookie>,
) -> Result<String, OAuth2Error> {
    open_check(request, &config.cookies.nonce, &config.secret, cleanup)
}
