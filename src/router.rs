//! The action router.
//!
//! One entry point per deployment: a framework adapter normalizes its
//! request, calls [`handle`] (or [`process`] for `http`-typed hosts), and
//! translates the [`ResponseInternal`] back. Every error is logged and
//! converted here; API actions answer with JSON status codes, browser flows
//! redirect to the error page.

use http::{HeaderMap, Method, StatusCode};
use serde_json::{Map, Value, json};
use url::Url;

use crate::config::AuthConfig;
use crate::csrf::{create_csrf_token, parse_csrf_cookie, verify_csrf_submission};
use crate::email::{handle_email_callback, handle_email_signin};
use crate::errors::AuthError;
use crate::oauth2::authorization_response;
use crate::oauth2::callback::{gate_sign_in, handle_oauth_callback};
use crate::pages;
use crate::providers::{Provider, ProviderInfo, resolve};
use crate::request::{Action, RequestInternal};
use crate::response::{Cookie, ResponseInternal};
use crate::session::{establish_jwt_session, session_response, signout_response};

/// Dispatch one normalized request.
pub async fn handle(request: &RequestInternal, config: &AuthConfig) -> ResponseInternal {
    match dispatch(request, config).await {
        Ok(response) => response,
        Err(err) => error_response(request, config, err),
    }
}

/// Convenience wrapper for hosts that speak `http` types directly: parses
/// the request, dispatches, and reports an unroutable path as JSON 404.
pub async fn process(
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<&str>,
    config: &AuthConfig,
) -> ResponseInternal {
    match RequestInternal::new(method, url, headers, body, &config.base_path) {
        Ok(request) => handle(&request, config).await,
        Err(err) => {
            let err = err.log();
            ResponseInternal::json(StatusCode::NOT_FOUND, json!({"error": err.kind()}))
        }
    }
}

fn error_response(
    request: &RequestInternal,
    config: &AuthConfig,
    err: AuthError,
) -> ResponseInternal {
    let err = err.log();
    if request.action.is_api() {
        let status = match &err {
            AuthError::MissingCsrf | AuthError::AccessDenied => StatusCode::FORBIDDEN,
            AuthError::UnknownAction(_) | AuthError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ResponseInternal::json(status, json!({"error": err.kind()}))
    } else {
        ResponseInternal::redirect(config.error_page_url(err.kind()))
    }
}

async fn dispatch(
    request: &RequestInternal,
    config: &AuthConfig,
) -> Result<ResponseInternal, AuthError> {
    match request.action {
        Action::Providers => Ok(providers_response(config)),
        Action::Csrf => {
            let (token, cookie) = csrf_pair(request, config)?;
            let mut response =
                ResponseInternal::json(StatusCode::OK, json!({"csrfToken": token})).no_store();
            if let Some(cookie) = cookie {
                response = response.with_cookies(vec![cookie]);
            }
            Ok(response)
        }
        Action::Session => session_response(request, config).await,
        Action::SignIn => signin(request, config).await,
        Action::SignOut => signout(request, config).await,
        Action::Callback => callback(request, config).await,
        Action::VerifyRequest => Ok(match &config.pages.verify_request {
            Some(custom) => ResponseInternal::redirect(custom.clone()),
            None => pages::verify_request_page(config),
        }),
        Action::Error => Ok(match &config.pages.error {
            // Custom page deployments never see the built-in markup.
            Some(_) => {
                let kind = request.query_param("error").unwrap_or("Default");
                ResponseInternal::redirect(config.error_page_url(kind))
            }
            None => pages::error_page(request, config),
        }),
    }
}

fn providers_response(config: &AuthConfig) -> ResponseInternal {
    let mut body = Map::new();
    for provider in &config.providers {
        let info = ProviderInfo {
            id: provider.id().to_string(),
            name: provider.name().to_string(),
            provider_type: provider.type_name().to_string(),
            signin_url: config.api_url(&format!("signin/{}", provider.id())),
            callback_url: config.callback_url(provider.id()),
        };
        match serde_json::to_value(&info) {
            Ok(value) => {
                body.insert(provider.id().to_string(), value);
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize provider info"),
        }
    }
    ResponseInternal::json(StatusCode::OK, Value::Object(body))
}

/// Reuse a valid CSRF cookie or mint a fresh pair. Returns the bare token
/// and the cookie to set when one was minted.
fn csrf_pair(
    request: &RequestInternal,
    config: &AuthConfig,
) -> Result<(String, Option<Cookie>), AuthError> {
    if let Some(value) = request.cookie(&config.cookies.csrf_token.name)
        && let Some(token) = parse_csrf_cookie(value, &config.secret)
    {
        return Ok((token, None));
    }
    let pair = create_csrf_token(&config.secret)?;
    let cookie = Cookie::new(
        &config.cookies.csrf_token.name,
        pair.cookie_value,
        config.cookies.csrf_token.options.clone(),
    );
    Ok((pair.token, Some(cookie)))
}

fn require_csrf(request: &RequestInternal, config: &AuthConfig) -> Result<(), AuthError> {
    verify_csrf_submission(
        request.cookie(&config.cookies.csrf_token.name),
        request.submitted_csrf_token(),
        &config.secret,
    )?;
    Ok(())
}

/// `GET` renders (or redirects to) the sign-in page; `POST {provider}`
/// starts the flow after the CSRF gate.
async fn signin(
    request: &RequestInternal,
    config: &AuthConfig,
) -> Result<ResponseInternal, AuthError> {
    if request.method != Method::POST {
        if let Some(custom) = config.signin_page_url() {
            return Ok(ResponseInternal::redirect(custom.to_string()));
        }
        let (token, cookie) = csrf_pair(request, config)?;
        let mut response = pages::signin_page(config, &token);
        if let Some(cookie) = cookie {
            response = response.with_cookies(vec![cookie]);
        }
        return Ok(response);
    }

    require_csrf(request, config)?;
    match resolve(&config.providers, request.provider_id.as_deref())? {
        Provider::OAuth(provider) => authorization_response(request, provider, false, config),
        Provider::Oidc(provider) => authorization_response(request, provider, true, config),
        Provider::Email(provider) => handle_email_signin(request, provider, config).await,
        // Credentials and WebAuthn do not have an authorization hop; the
        // sign-in page posts straight to their callback endpoints.
        Provider::Credentials(_) | Provider::WebAuthn(_) => Ok(ResponseInternal::redirect(
            config.api_url("signin"),
        )),
    }
}

async fn signout(
    request: &RequestInternal,
    config: &AuthConfig,
) -> Result<ResponseInternal, AuthError> {
    if request.method != Method::POST {
        let (token, cookie) = csrf_pair(request, config)?;
        let mut response = pages::signout_page(config, &token);
        if let Some(cookie) = cookie {
            response = response.with_cookies(vec![cookie]);
        }
        return Ok(response);
    }
    require_csrf(request, config)?;
    signout_response(request, config).await
}

async fn callback(
    request: &RequestInternal,
    config: &AuthConfig,
) -> Result<ResponseInternal, AuthError> {
    match resolve(&config.providers, request.provider_id.as_deref())? {
        Provider::OAuth(provider) => {
            Ok(handle_oauth_callback(request, provider, false, config).await)
        }
        Provider::Oidc(provider) => {
            Ok(handle_oauth_callback(request, provider, true, config).await)
        }
        Provider::Email(provider) => handle_email_callback(request, provider, config).await,
        Provider::Credentials(provider) => {
            if request.method != Method::POST {
                return Err(AuthError::UnknownAction(
                    "credentials callback requires POST".to_string(),
                ));
            }
            require_csrf(request, config)?;
            let credentials = request.body.clone().unwrap_or_default();
            let user = (provider.authorize)(credentials)
                .await
                .map_err(|e| {
                    tracing::debug!(error = %e, "Credentials authorize rejected");
                    AuthError::AccessDenied
                })?
                .ok_or(AuthError::AccessDenied)?;
            gate_sign_in(config, &user, None, None)?;

            // Credentials sessions are always stateless; there is no
            // provider account or verified identifier to persist.
            let cookies = establish_jwt_session(&user, config)?;
            let target = (config.callbacks.redirect)(
                request.param("callbackUrl").unwrap_or(""),
                &config.request_base_url(request),
            );
            if let Some(event) = &config.events.sign_in {
                event(&json!({
                    "provider": provider.id,
                    "user": {"id": user.id, "email": user.email},
                }));
            }
            Ok(ResponseInternal::redirect(target).with_cookies(cookies))
        }
        Provider::WebAuthn(_) => Err(AuthError::Configuration(
            "webauthn ceremonies are handled outside the core engine".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::providers::CredentialsProvider;
    use crate::providers::UserProfile;
    use crate::response::Body;
    use crate::test_utils::{
        MockOAuthHttp, cookie_pairs, cookie_refs, test_config, test_post_request,
        test_request_with_cookies,
    };

    fn body_json(response: &ResponseInternal) -> Value {
        match &response.body {
            Some(Body::Json(value)) => value.clone(),
            other => panic!("Expected JSON body, got {other:?}"),
        }
    }

    /// Fetch a CSRF token the way a client would: via the csrf action.
    async fn fetch_csrf(config: &AuthConfig) -> (String, Vec<(String, String)>) {
        let request = test_request_with_cookies("/api/auth/csrf", &[]);
        let response = handle(&request, config).await;
        let token = body_json(&response)["csrfToken"].as_str().unwrap().to_string();
        (token, cookie_pairs(&response.cookies))
    }

    #[tokio::test]
    async fn test_providers_action_lists_metadata() {
        let config = test_config();
        let request = test_request_with_cookies("/api/auth/providers", &[]);
        let response = handle(&request, &config).await;
        let body = body_json(&response);
        assert_eq!(body["acme"]["type"], "oauth");
        assert_eq!(
            body["acme"]["callbackUrl"],
            "https://app.example/api/auth/callback/acme"
        );
        assert_eq!(
            body["acme"]["signinUrl"],
            "https://app.example/api/auth/signin/acme"
        );
    }

    #[tokio::test]
    async fn test_csrf_action_mints_then_reuses() {
        let config = test_config();
        let (token, cookies) = fetch_csrf(&config).await;
        assert!(!token.is_empty());
        assert_eq!(cookies.len(), 1);

        // Second fetch with the cookie returns the same token, no new cookie.
        let request = test_request_with_cookies("/api/auth/csrf", &cookie_refs(&cookies));
        let response = handle(&request, &config).await;
        assert_eq!(body_json(&response)["csrfToken"], token.as_str());
        assert!(response.cookies.is_empty());
        assert_eq!(
            response.headers.get(http::header::CACHE_CONTROL).unwrap(),
            "private, no-cache, no-store"
        );
    }

    #[tokio::test]
    async fn test_signin_post_requires_csrf_before_provider_logic() {
        let config = test_config();
        let request = test_post_request("/api/auth/signin/acme", "callbackUrl=%2Fhome", &[]);
        let response = handle(&request, &config).await;
        // Browser flow: rejected with a redirect to the error page, before
        // any check cookies are minted.
        assert_eq!(
            response.redirect.as_deref(),
            Some("https://app.example/api/auth/error?error=MissingCSRF")
        );
        assert!(response.cookies.is_empty());
    }

    #[tokio::test]
    async fn test_signin_builds_authorization_redirect_with_checks() {
        let config = test_config();
        let (token, cookies) = fetch_csrf(&config).await;
        let body = format!("csrfToken={token}&callbackUrl=%2Fdashboard");
        let request = test_post_request("/api/auth/signin/acme", &body, &cookie_refs(&cookies));
        let response = handle(&request, &config).await;

        let target = Url::parse(response.redirect.as_deref().unwrap()).unwrap();
        assert_eq!(target.host_str(), Some("provider.example"));
        let query: std::collections::HashMap<String, String> = target
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "client-id");
        assert_eq!(query["code_challenge_method"], "S256");
        assert!(query.contains_key("code_challenge"));
        assert!(query.contains_key("state"));
        assert_eq!(
            query["redirect_uri"],
            "https://app.example/api/auth/callback/acme"
        );

        // state + pkce check cookies and the callback-url cookie.
        let names: Vec<&str> = response.cookies.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&config.cookies.state.name.as_str()));
        assert!(names.contains(&config.cookies.pkce_code_verifier.name.as_str()));
        assert!(names.contains(&config.cookies.callback_url.name.as_str()));
        let callback_cookie = response
            .cookies
            .iter()
            .find(|c| c.name == config.cookies.callback_url.name)
            .unwrap();
        assert_eq!(callback_cookie.value, "https://app.example/dashboard");
    }

    #[tokio::test]
    async fn test_full_oauth_flow_through_router() {
        let http = Arc::new(MockOAuthHttp::new(
            json!({"access_token": "at", "token_type": "bearer"}),
            json!({"id": "u-9", "name": "Flow User", "email": "flow@example.com"}),
        ));
        let config = test_config().with_http(http);

        // signin
        let (token, csrf_cookies) = fetch_csrf(&config).await;
        let body = format!("csrfToken={token}");
        let signin_request =
            test_post_request("/api/auth/signin/acme", &body, &cookie_refs(&csrf_cookies));
        let signin_response = handle(&signin_request, &config).await;
        let auth_url = Url::parse(signin_response.redirect.as_deref().unwrap()).unwrap();
        let state = auth_url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        // callback, presenting the cookies the signin response set
        let mut jar = cookie_pairs(&signin_response.cookies);
        let callback_path = format!("/api/auth/callback/acme?code=the-code&state={state}");
        let callback_request = test_request_with_cookies(&callback_path, &cookie_refs(&jar));
        let callback_response = handle(&callback_request, &config).await;
        assert_eq!(
            callback_response.redirect.as_deref(),
            Some("https://app.example")
        );

        // apply the Set-Cookie headers the way a browser would: expired
        // check cookies drop out, the session cookie joins
        for cookie in &callback_response.cookies {
            jar.retain(|(name, _)| name != &cookie.name);
            if cookie.options.max_age != Some(0) {
                jar.push((cookie.name.clone(), cookie.value.clone()));
            }
        }
        assert!(jar.iter().any(|(name, _)| name.contains("session-token")));

        // session
        let session_request = test_request_with_cookies("/api/auth/session", &cookie_refs(&jar));
        let session_response = handle(&session_request, &config).await;
        let session = body_json(&session_response);
        assert_eq!(session["user"]["email"], "flow@example.com");
        assert_eq!(session["user"]["name"], "Flow User");

        // replaying the callback from the post-callback jar fails: the
        // check cookies are gone
        let replay_request = test_request_with_cookies(&callback_path, &cookie_refs(&jar));
        let replay_response = handle(&replay_request, &config).await;
        assert_eq!(
            replay_response.redirect.as_deref(),
            Some("https://app.example/api/auth/error?error=InvalidCheck")
        );
    }

    #[tokio::test]
    async fn test_credentials_callback_flow() {
        let mut config = test_config();
        config.providers.push(Provider::Credentials(
            CredentialsProvider::new(Arc::new(|credentials| {
                Box::pin(async move {
                    let password = credentials
                        .get("password")
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    if password == "hunter2" {
                        Ok(Some(UserProfile {
                            id: "cred-user".to_string(),
                            name: None,
                            email: Some("c@example.com".to_string()),
                            image: None,
                        }))
                    } else {
                        Ok(None)
                    }
                })
            })),
        ));

        let (token, csrf_cookies) = fetch_csrf(&config).await;
        let pairs = cookie_refs(&csrf_cookies);

        let body = format!("csrfToken={token}&password=wrong");
        let request = test_post_request("/api/auth/callback/credentials", &body, &pairs);
        let response = handle(&request, &config).await;
        assert_eq!(
            response.redirect.as_deref(),
            Some("https://app.example/api/auth/error?error=AccessDenied")
        );

        let body = format!("csrfToken={token}&password=hunter2");
        let request = test_post_request("/api/auth/callback/credentials", &body, &pairs);
        let response = handle(&request, &config).await;
        assert_eq!(response.redirect.as_deref(), Some("https://app.example"));
        assert!(response
            .cookies
            .iter()
            .any(|c| c.name == config.cookies.session_token.name));
    }

    #[tokio::test]
    async fn test_api_errors_are_json_with_status() {
        let config = test_config();
        let request = test_request_with_cookies("/api/auth/session", &[]);
        // Session without a cookie is not an error, so force one through an
        // unknown provider on an API-adjacent path instead.
        let response = handle(&request, &config).await;
        assert_eq!(response.status, StatusCode::OK);

        let response = process(
            Method::GET,
            Url::parse("https://app.example/api/auth/nonsense").unwrap(),
            HeaderMap::new(),
            None,
            &config,
        )
        .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(body_json(&response)["error"], "UnknownAction");
    }

    #[tokio::test]
    async fn test_unknown_provider_redirects_browser_flow() {
        let config = test_config();
        let request = test_request_with_cookies("/api/auth/callback/ghost?code=x", &[]);
        let response = handle(&request, &config).await;
        assert_eq!(
            response.redirect.as_deref(),
            Some("https://app.example/api/auth/error?error=UnknownProvider")
        );
    }

    #[tokio::test]
    async fn test_signin_page_renders_with_csrf_form() {
        let config = test_config();
        let request = test_request_with_cookies("/api/auth/signin", &[]);
        let response = handle(&request, &config).await;
        match &response.body {
            Some(Body::Html(markup)) => {
                assert!(markup.contains("signin/acme"));
                assert!(markup.contains("csrfToken"));
            }
            other => panic!("Expected HTML body, got {other:?}"),
        }
        // The CSRF cookie backing the embedded token is set.
        assert_eq!(response.cookies.len(), 1);
        assert_eq!(response.cookies[0].name, config.cookies.csrf_token.name);
    }

    #[tokio::test]
    async fn test_error_page_override_redirects() {
        let mut config = test_config();
        config.pages.error = Some("https://app.example/auth-error".to_string());
        let request = test_request_with_cookies("/api/auth/error?error=AccessDenied", &[]);
        let response = handle(&request, &config).await;
        assert_eq!(
            response.redirect.as_deref(),
            Some("https://app.example/auth-error?error=AccessDenied")
        );
    }
}
