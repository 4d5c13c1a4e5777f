//! OAuth2/OIDC protocol flow: authorization URL construction, the
//! state/pkce/nonce checks, code exchange, ID-token verification and the
//! callback orchestration.

pub(crate) mod callback;
pub(crate) mod checks;
pub mod client;
pub(crate) mod idtoken;

pub use client::{HttpClientError, OAuthHttp, ReqwestHttp};

use thiserror::Error;

use crate::config::AuthConfig;
use crate::errors::AuthError;
use crate::providers::{Check, OAuthProvider};
use crate::request::RequestInternal;
use crate::response::{Cookie, ResponseInternal};

#[derive(Debug, Error, Clone)]
pub enum OAuth2Error {
    /// A check cookie was absent or failed signature verification.
    #[error("Security token not found: {0}")]
    SecurityTokenNotFound(String),

    #[error("State mismatch")]
    StateMismatch,

    #[error("Nonce mismatch")]
    NonceMismatch,

    #[error("Decode state error: {0}")]
    DecodeState(String),

    #[error("Token exchange error: {0}")]
    TokenExchange(String),

    #[error("Fetch user info error: {0}")]
    FetchUserInfo(String),

    #[error("Id token error: {0}")]
    IdToken(String),

    #[error("Serde error: {0}")]
    Serde(String),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Build the authorization redirect for an OAuth2/OIDC sign-in: the
/// provider's authorization endpoint plus static params plus one dynamically
/// injected value per configured check, each backed by a short-lived signed
/// cookie for later comparison at the callback.
pub(crate) fn authorization_response(
    request: &RequestInternal,
    provider: &OAuthProvider,
    is_oidc: bool,
    config: &AuthConfig,
) -> Result<ResponseInternal, AuthError> {
    let redirect_uri = match &provider.redirect_proxy_url {
        Some(proxy) => proxy.to_string(),
        None => config.callback_url(&provider.id),
    };

    let mut auth_url = provider.authorization_endpoint.clone();
    auth_url
        .query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &provider.client_id)
        .append_pair("redirect_uri", &redirect_uri);
    for (key, value) in &provider.authorization_params {
        auth_url.query_pairs_mut().append_pair(key, value);
    }

    let mut cookies: Vec<Cookie> = Vec::new();
    for check in &provider.checks {
        match check {
            Check::State => {
                let proxy_origin = provider
                    .redirect_proxy_url
                    .as_ref()
                    .map(|_| config.origin());
                let state = checks::create_state(config, proxy_origin.as_deref())?;
                auth_url
                    .query_pairs_mut()
                    .append_pair("state", &state.value);
                cookies.push(state.cookie);
            }
            Check::Pkce => {
                let (challenge, verifier) = checks::create_pkce(config)?;
                auth_url
                    .query_pairs_mut()
                    .append_pair("code_challenge", &challenge)
                    .append_pair("code_challenge_method", "S256");
                cookies.push(verifier.cookie);
            }
            Check::Nonce => {
                if !is_oidc {
                    tracing::debug!(provider = %provider.id, "Skipping nonce check on non-OIDC provider");
                    continue;
                }
                let nonce = checks::create_nonce(config)?;
                auth_url.query_pairs_mut().append_pair("nonce", &nonce.value);
                cookies.push(nonce.cookie);
            }
            Check::None => {}
        }
    }

    // Record where to land after the callback completes, clamped to the
    // configured origin.
    let requested = request.param("callbackUrl").unwrap_or("");
    let callback_target = (config.callbacks.redirect)(requested, &config.request_base_url(request));
    cookies.push(Cookie::new(
        &config.cookies.callback_url.name,
        callback_target,
        config.cookies.callback_url.options.clone(),
    ));

    tracing::debug!(provider = %provider.id, "Prepared authorization redirect");
    Ok(ResponseInternal::redirect(auth_url).with_cookies(cookies))
}
