//! OAuth2/OIDC callback orchestration.
//!
//! The handler consumes the check cookies, exchanges the code, resolves the
//! profile, and establishes a session. Check cookies are cleared on every
//! exit path, so this module converts its own failures into error-page
//! redirects instead of bubbling them to the router.

use serde_json::{Value, json};
use url::Url;

use super::OAuth2Error;
use super::checks;
use super::client::{TokenSet, exchange_code, fetch_userinfo};
use super::idtoken::verify_id_token;
use crate::adapter::AdapterAccount;
use crate::callbacks::SignInAttempt;
use crate::config::AuthConfig;
use crate::errors::AuthError;
use crate::providers::{Check, OAuthProvider, UserProfile};
use crate::request::RequestInternal;
use crate::response::{Cookie, ResponseInternal};
use crate::session::{establish_session, profile_of, upsert_user_account};

/// Handle `GET|POST {basePath}/callback/{provider}` for an OAuth2/OIDC
/// provider. Never returns `Err`: failures become error-page redirects so
/// the queued check-cookie cleanup always reaches the browser.
pub(crate) async fn handle_oauth_callback(
    request: &RequestInternal,
    provider: &OAuthProvider,
    is_oidc: bool,
    config: &AuthConfig,
) -> ResponseInternal {
    let mut cleanup: Vec<Cookie> = Vec::new();
    let result = match proxy_forward(request, provider, config) {
        Ok(Some(forward)) => return forward,
        Ok(None) => run_callback(request, provider, is_oidc, config, &mut cleanup).await,
        Err(err) => Err(err),
    };
    expire_remaining_checks(request, config, &mut cleanup);
    match result {
        Ok(response) => response.with_cookies(cleanup),
        Err(err) => {
            let err = err.log();
            ResponseInternal::redirect(config.error_page_url(err.kind())).with_cookies(cleanup)
        }
    }
}

/// Expire any check cookie still on the request that the flow did not
/// consume. A check minted at signin must not survive its callback,
/// whichever branch the flow took.
fn expire_remaining_checks(
    request: &RequestInternal,
    config: &AuthConfig,
    cleanup: &mut Vec<Cookie>,
) {
    let templates = [
        &config.cookies.state,
        &config.cookies.pkce_code_verifier,
        &config.cookies.nonce,
    ];
    for template in templates {
        if request.cookie(&template.name).is_some()
            && !cleanup.iter().any(|c| c.name == template.name)
        {
            cleanup.push(Cookie::expired(&template.name, &template.options));
        }
    }
}

/// Redirect-proxy hop: when this deployment fronts the flow for another
/// origin, the wrapped `state` names where the callback really belongs. The
/// proxy forwards the provider response verbatim; all checks run at the
/// destination, which holds the cookies.
fn proxy_forward(
    request: &RequestInternal,
    provider: &OAuthProvider,
    config: &AuthConfig,
) -> Result<Option<ResponseInternal>, AuthError> {
    if provider.redirect_proxy_url.is_none() {
        return Ok(None);
    }
    let Some(state) = request.param("state") else {
        return Ok(None);
    };
    let Some(proxy_state) = checks::unwrap_proxy_state(state) else {
        return Ok(None);
    };
    if proxy_state.origin == config.origin() {
        return Ok(None);
    }
    // The destination origin must at least parse; a mangled state is not
    // worth a redirect loop.
    if let Err(e) = Url::parse(&proxy_state.origin) {
        return Err(OAuth2Error::DecodeState(format!("proxy origin is not a URL: {e}")).into());
    }

    let query = request.url.query().unwrap_or("");
    let target = format!(
        "{}{}/callback/{}?{query}",
        proxy_state.origin.trim_end_matches('/'),
        config.base_path,
        provider.id
    );
    tracing::debug!(provider = %provider.id, "Forwarding proxied callback");
    Ok(Some(ResponseInternal::redirect(target)))
}

async fn run_callback(
    request: &RequestInternal,
    provider: &OAuthProvider,
    is_oidc: bool,
    config: &AuthConfig,
    cleanup: &mut Vec<Cookie>,
) -> Result<ResponseInternal, AuthError> {
    if let Some(error) = request.param("error") {
        return Err(match error {
            "access_denied" => AuthError::AccessDenied,
            other => AuthError::OAuthCallback(format!("provider returned error: {other}")),
        });
    }

    if provider.has_check(Check::State) {
        checks::use_state(request, config, cleanup)?;
    }
    let code = request
        .param("code")
        .ok_or_else(|| AuthError::OAuthCallback("missing code parameter".to_string()))?;
    let pkce_verifier = if provider.has_check(Check::Pkce) {
        Some(checks::use_pkce(request, config, cleanup)?)
    } else {
        None
    };

    let redirect_uri = match &provider.redirect_proxy_url {
        Some(proxy) => proxy.to_string(),
        None => config.callback_url(&provider.id),
    };
    let tokens = exchange_code(
        provider,
        code,
        pkce_verifier.as_deref(),
        &redirect_uri,
        config.http.as_ref(),
    )
    .await?;

    let payload = resolve_profile_payload(request, provider, is_oidc, config, &tokens, cleanup)
        .await?;
    let profile = (provider.profile)(&payload)
        .map_err(|e| AuthError::OAuthCallback(format!("profile mapping failed: {e}")))?;

    let account = AdapterAccount {
        user_id: String::new(),
        provider: provider.id.clone(),
        provider_account_id: profile.id.clone(),
        account_type: if is_oidc { "oidc" } else { "oauth" }.to_string(),
        access_token: Some(tokens.access_token.clone()),
        refresh_token: tokens.refresh_token.clone(),
        expires_at: tokens.expires_in.map(|s| chrono::Utc::now().timestamp() + s),
        scope: tokens.scope.clone(),
        id_token: tokens.id_token.clone(),
    };

    gate_sign_in(config, &profile, Some(&account), Some(&payload))?;

    let session_user: UserProfile = match &config.adapter {
        Some(adapter) => {
            profile_of(&upsert_user_account(&profile, account, adapter.as_ref(), config).await?)
        }
        None => profile.clone(),
    };
    let session_cookies = establish_session(&session_user, config).await?;

    if let Some(event) = &config.events.sign_in {
        event(&json!({
            "provider": provider.id,
            "user": {"id": session_user.id, "email": session_user.email},
        }));
    }

    let target = finish_redirect_target(request, config, cleanup);
    tracing::debug!(provider = %provider.id, "OAuth sign-in completed");
    Ok(ResponseInternal::redirect(target).with_cookies(session_cookies))
}

/// OIDC verifies the ID token (consuming the nonce check) and uses its
/// claims; plain OAuth2 fetches the userinfo document.
async fn resolve_profile_payload(
    request: &RequestInternal,
    provider: &OAuthProvider,
    is_oidc: bool,
    config: &AuthConfig,
    tokens: &TokenSet,
    cleanup: &mut Vec<Cookie>,
) -> Result<Value, AuthError> {
    if is_oidc {
        let expected_nonce = if provider.has_check(Check::Nonce) {
            Some(checks::use_nonce(request, config, cleanup)?)
        } else {
            None
        };
        let id_token = tokens.id_token.as_deref().ok_or_else(|| {
            AuthError::OAuthCallback("token response carried no id_token".to_string())
        })?;
        let claims = verify_id_token(
            id_token,
            provider,
            expected_nonce.as_deref(),
            config.http.as_ref(),
        )
        .await?;
        Ok(Value::Object(claims))
    } else {
        Ok(fetch_userinfo(provider, &tokens.access_token, config.http.as_ref()).await?)
    }
}

/// Apply the user `sign_in` gate. A `false` surfaces as `AccessDenied`; an
/// `Err` is treated as a host-side configuration problem.
pub(crate) fn gate_sign_in(
    config: &AuthConfig,
    user: &UserProfile,
    account: Option<&AdapterAccount>,
    payload: Option<&Value>,
) -> Result<(), AuthError> {
    if let Some(sign_in) = &config.callbacks.sign_in {
        match sign_in(&SignInAttempt {
            user,
            account,
            profile: payload,
        }) {
            Ok(true) => {}
            Ok(false) => return Err(AuthError::AccessDenied),
            Err(e) => return Err(AuthError::Configuration(format!("signIn callback: {e}"))),
        }
    }
    Ok(())
}

/// Resolve and consume the callback-url cookie, clamped to the origin.
pub(crate) fn finish_redirect_target(
    request: &RequestInternal,
    config: &AuthConfig,
    cleanup: &mut Vec<Cookie>,
) -> String {
    let requested = request
        .cookie(&config.cookies.callback_url.name)
        .unwrap_or("");
    if request.cookie(&config.cookies.callback_url.name).is_some() {
        cleanup.push(Cookie::expired(
            &config.cookies.callback_url.name,
            &config.cookies.callback_url.options,
        ));
    }
    (config.callbacks.redirect)(requested, &config.request_base_url(request))
}
