//! Session establishment, the `session` endpoint, and sign-out.
//!
//! Two strategies: a stateless HS256 JWT living entirely in the (possibly
//! chunked) session cookie, or an opaque token referencing a session record
//! behind the adapter. Every flow that authenticates a user funnels through
//! [`establish_session`].

use chrono::{DateTime, Duration, Utc};
use http::StatusCode;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::adapter::{Adapter, AdapterAccount, AdapterSession, AdapterUser};
use crate::config::{AuthConfig, SessionStrategy};
use crate::cookie::SessionStore;
use crate::errors::AuthError;
use crate::jwt::{decode_jwt, encode_jwt};
use crate::providers::UserProfile;
use crate::request::RequestInternal;
use crate::response::{Cookie, ResponseInternal};

pub(crate) fn profile_of(user: &AdapterUser) -> UserProfile {
    UserProfile {
        id: user.id.clone(),
        name: user.name.clone(),
        email: user.email.clone(),
        image: user.image.clone(),
    }
}

/// Find or create the user a completed sign-in belongs to, and link the
/// provider account on first contact. An e-mail that already belongs to a
/// user without this provider account is rejected rather than silently
/// merged.
pub(crate) async fn upsert_user_account(
    profile: &UserProfile,
    mut account: AdapterAccount,
    adapter: &dyn Adapter,
    config: &AuthConfig,
) -> Result<AdapterUser, AuthError> {
    if let Some(user) = adapter
        .get_user_by_account(&account.provider, &account.provider_account_id)
        .await?
    {
        return Ok(user);
    }

    if let Some(email) = profile.email.as_deref()
        && adapter.get_user_by_email(email).await?.is_some()
    {
        return Err(AuthError::AccountNotLinked);
    }

    let user = adapter
        .create_user(AdapterUser {
            id: Uuid::new_v4().to_string(),
            name: profile.name.clone(),
            email: profile.email.clone(),
            image: profile.image.clone(),
            email_verified: None,
        })
        .await?;
    account.user_id = user.id.clone();
    adapter.link_account(account).await?;

    if let Some(event) = &config.events.create_user {
        event(&json!({"user": {"id": user.id, "email": user.email}}));
    }
    tracing::debug!(user_id = %user.id, "Created user and linked account");
    Ok(user)
}

fn session_claims(user: &UserProfile) -> Map<String, Value> {
    let mut claims = Map::new();
    claims.insert("sub".to_string(), json!(user.id));
    if let Some(name) = &user.name {
        claims.insert("name".to_string(), json!(name));
    }
    if let Some(email) = &user.email {
        claims.insert("email".to_string(), json!(email));
    }
    if let Some(image) = &user.image {
        claims.insert("picture".to_string(), json!(image));
    }
    claims
}

fn session_cookie_options(config: &AuthConfig) -> crate::response::CookieOptions {
    let mut options = config.cookies.session_token.options.clone();
    options.max_age = Some(config.session.max_age);
    options
}

/// Mint the stateless JWT session cookies. Used directly by flows that
/// never persist a session record (credentials), and by
/// [`establish_session`] under the JWT strategy.
pub(crate) fn establish_jwt_session(
    user: &UserProfile,
    config: &AuthConfig,
) -> Result<Vec<Cookie>, AuthError> {
    let mut claims = session_claims(user);
    if let Some(jwt) = &config.callbacks.jwt {
        claims = jwt(claims, Some(user));
    }
    let token = encode_jwt(
        claims,
        &config.secret,
        &config.cookies.session_token.name,
        config.session.max_age,
    )
    .map_err(AuthError::from)?;
    let store = SessionStore::new(&config.cookies.session_token, &[]);
    Ok(store.chunk(&token, &session_cookie_options(config)))
}

/// Mint the session cookies for a freshly authenticated user.
pub(crate) async fn establish_session(
    user: &UserProfile,
    config: &AuthConfig,
) -> Result<Vec<Cookie>, AuthError> {
    match config.session.strategy {
        SessionStrategy::Jwt => establish_jwt_session(user, config),
        SessionStrategy::Database => {
            let adapter = config.adapter.as_deref().ok_or_else(|| {
                AuthError::Configuration(
                    "database session strategy requires an adapter".to_string(),
                )
            })?;
            let session = adapter
                .create_session(AdapterSession {
                    session_token: Uuid::new_v4().to_string(),
                    user_id: user.id.clone(),
                    expires: Utc::now() + Duration::seconds(config.session.max_age),
                })
                .await?;
            Ok(vec![Cookie::new(
                &config.cookies.session_token.name,
                session.session_token,
                session_cookie_options(config),
            )])
        }
    }
}

fn null_session(cookies: Vec<Cookie>) -> ResponseInternal {
    ResponseInternal::json(StatusCode::OK, Value::Null).with_cookies(cookies)
}

fn session_body(
    claims: &Map<String, Value>,
    expires: DateTime<Utc>,
    config: &AuthConfig,
) -> Value {
    let text = |key: &str| claims.get(key).cloned().unwrap_or(Value::Null);
    let mut body = json!({
        "user": {
            "name": text("name"),
            "email": text("email"),
            "image": text("picture"),
        },
        "expires": expires.to_rfc3339(),
    });
    if let Some(session) = &config.callbacks.session {
        body = session(body, claims);
    }
    body
}

/// `GET {basePath}/session`: the current session as JSON, `null` when there
/// is none. A present but invalid cookie is cleared and reported as `null`,
/// never as an error.
pub(crate) async fn session_response(
    request: &RequestInternal,
    config: &AuthConfig,
) -> Result<ResponseInternal, AuthError> {
    let store = SessionStore::new(&config.cookies.session_token, &request.cookies);
    let Some(token) = store.value() else {
        return Ok(null_session(Vec::new()));
    };

    match config.session.strategy {
        SessionStrategy::Jwt => {
            let claims =
                match decode_jwt(&token, &config.secret, &config.cookies.session_token.name) {
                    Ok(claims) => claims,
                    Err(e) => {
                        tracing::debug!(error = %e, "Dropping invalid session token");
                        return Ok(null_session(store.clean()));
                    }
                };
            let mut claims = match &config.callbacks.jwt {
                Some(jwt) => jwt(claims, None),
                None => claims,
            };
            // Sliding expiry: every read re-signs the token with a fresh
            // window while preserving its jti.
            claims.remove("exp");
            claims.remove("iat");
            let expires = Utc::now() + Duration::seconds(config.session.max_age);
            let body = session_body(&claims, expires, config);
            let refreshed = encode_jwt(
                claims,
                &config.secret,
                &config.cookies.session_token.name,
                config.session.max_age,
            )
            .map_err(AuthError::from)?;
            Ok(ResponseInternal::json(StatusCode::OK, body)
                .with_cookies(store.chunk(&refreshed, &session_cookie_options(config))))
        }
        SessionStrategy::Database => {
            let adapter = config.adapter.as_deref().ok_or_else(|| {
                AuthError::Configuration(
                    "database session strategy requires an adapter".to_string(),
                )
            })?;
            let Some(mut session) = adapter.get_session(&token).await? else {
                return Ok(null_session(store.clean()));
            };
            if session.expires <= Utc::now() {
                adapter.delete_session(&token).await?;
                return Ok(null_session(store.clean()));
            }
            let Some(user) = adapter.get_user(&session.user_id).await? else {
                adapter.delete_session(&token).await?;
                return Ok(null_session(store.clean()));
            };

            // Extend the record at most once per update_age window.
            let due = session.expires - Duration::seconds(config.session.max_age)
                + Duration::seconds(config.session.update_age);
            let mut cookies = Vec::new();
            if Utc::now() > due {
                session.expires = Utc::now() + Duration::seconds(config.session.max_age);
                adapter.update_session(session.clone()).await?;
                cookies.push(Cookie::new(
                    &config.cookies.session_token.name,
                    &token,
                    session_cookie_options(config),
                ));
            }
            let claims = session_claims(&profile_of(&user));
            let body = session_body(&claims, session.expires, config);
            Ok(ResponseInternal::json(StatusCode::OK, body).with_cookies(cookies))
        }
    }
}

/// `POST {basePath}/signout`: clear the session cookies and, for database
/// sessions, delete the record. Idempotent; signing out without a session
/// still redirects cleanly.
pub(crate) async fn signout_response(
    request: &RequestInternal,
    config: &AuthConfig,
) -> Result<ResponseInternal, AuthError> {
    let store = SessionStore::new(&config.cookies.session_token, &request.cookies);
    let target = (config.callbacks.redirect)(
        request.param("callbackUrl").unwrap_or(""),
        &config.request_base_url(request),
    );

    if let Some(token) = store.value() {
        match config.session.strategy {
            SessionStrategy::Jwt => {
                if let Ok(claims) =
                    decode_jwt(&token, &config.secret, &config.cookies.session_token.name)
                    && let Some(event) = &config.events.sign_out
                {
                    event(&Value::Object(claims));
                }
            }
            SessionStrategy::Database => {
                if let Some(adapter) = config.adapter.as_deref() {
                    match adapter.get_session(&token).await {
                        Ok(Some(session)) => {
                            if let Some(event) = &config.events.sign_out {
                                event(&json!({"userId": session.user_id}));
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::error!(error = %e, "Session lookup failed on sign-out"),
                    }
                    // Cookie removal must not be blocked by a backend error.
                    if let Err(e) = adapter.delete_session(&token).await {
                        tracing::error!(error = %e, "Failed to delete session record");
                    }
                }
            }
        }
    }

    Ok(ResponseInternal::redirect(target).with_cookies(store.clean()))
}
