//! Email (magic link / OTP) sign-in.
//!
//! The plaintext token travels only in the verification URL (or the OTP
//! message); the adapter stores `sha256(token + secret)`, so a database leak
//! does not yield usable sign-in links. Consumption goes through the
//! adapter's atomic get-and-delete, making every token single-use.

use chrono::{Duration, Utc};
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::adapter::{Adapter, AdapterAccount, AdapterUser, VerificationToken};
use crate::config::AuthConfig;
use crate::errors::AuthError;
use crate::oauth2::callback::{finish_redirect_target, gate_sign_in};
use crate::providers::{EmailProvider, UserProfile, VerificationRequest};
use crate::request::RequestInternal;
use crate::response::{Cookie, ResponseInternal};
use crate::session::{establish_session, profile_of};
use crate::utils::{gen_random_string, sha256_hex};

#[derive(Debug, Error, Clone)]
pub enum EmailError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// The stored form of a verification token.
pub(crate) fn token_hash(token: &str, secret: &str) -> String {
    sha256_hex(&format!("{token}{secret}"))
}

/// Handle `POST {basePath}/signin/{email-provider}`: mint a token, persist
/// its hash, deliver the link, and send the browser to the verify-request
/// page.
pub(crate) async fn handle_email_signin(
    request: &RequestInternal,
    provider: &EmailProvider,
    config: &AuthConfig,
) -> Result<ResponseInternal, AuthError> {
    let adapter = config.adapter.as_deref().ok_or_else(|| {
        AuthError::Configuration("email sign-in requires an adapter".to_string())
    })?;

    let identifier = request
        .param("email")
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AuthError::EmailSignIn("missing email".to_string()))?;
    if !identifier.contains('@') {
        return Err(EmailError::InvalidIdentifier(identifier.to_string()).into());
    }

    let token = match &provider.generate_token {
        Some(generate) => generate(),
        None => gen_random_string(32)?,
    };
    let expires = Utc::now() + Duration::seconds(provider.max_age);

    let callback_target = (config.callbacks.redirect)(
        request.param("callbackUrl").unwrap_or(""),
        &config.request_base_url(request),
    );
    let mut url = Url::parse(&config.callback_url(&provider.id))
        .map_err(|e| AuthError::Internal(format!("invalid callback url: {e}")))?;
    url.query_pairs_mut()
        .append_pair("token", &token)
        .append_pair("email", identifier);

    let send = async {
        (provider.send_verification_request)(VerificationRequest {
            identifier: identifier.to_string(),
            url: url.to_string(),
            token: token.clone(),
            expires,
            provider_id: provider.id.clone(),
        })
        .await
        .map_err(AuthError::from)
    };
    let persist = async {
        adapter
            .create_verification_token(VerificationToken {
                identifier: identifier.to_string(),
                token: token_hash(&token, &config.secret),
                expires,
            })
            .await
            .map_err(|e| AuthError::CreateVerificationToken(e.to_string()))
    };

    // Deliver and persist concurrently; either failure aborts the sign-in.
    tokio::try_join!(send, persist)?;

    tracing::debug!(provider = %provider.id, "Verification token issued");
    let cookies = vec![Cookie::new(
        &config.cookies.callback_url.name,
        callback_target,
        config.cookies.callback_url.options.clone(),
    )];
    Ok(ResponseInternal::redirect(config.verify_request_url(&provider.id)).with_cookies(cookies))
}

/// Handle `GET {basePath}/callback/{email-provider}`: consume the token and
/// establish a session. Unknown, spent, and expired tokens are
/// indistinguishable to the caller.
pub(crate) async fn handle_email_callback(
    request: &RequestInternal,
    provider: &EmailProvider,
    config: &AuthConfig,
) -> Result<ResponseInternal, AuthError> {
    let adapter = config.adapter.as_deref().ok_or_else(|| {
        AuthError::Configuration("email sign-in requires an adapter".to_string())
    })?;

    let (Some(token), Some(identifier)) = (request.param("token"), request.param("email")) else {
        return Err(AuthError::Verification);
    };

    let record = adapter
        .use_verification_token(identifier, &token_hash(token, &config.secret))
        .await?
        .ok_or(AuthError::Verification)?;
    if record.expires <= Utc::now() {
        return Err(AuthError::Verification);
    }

    let user = upsert_email_user(identifier, adapter).await?;
    let account = AdapterAccount {
        user_id: user.id.clone(),
        provider: provider.id.clone(),
        provider_account_id: identifier.to_string(),
        account_type: "email".to_string(),
        access_token: None,
        refresh_token: None,
        expires_at: None,
        scope: None,
        id_token: None,
    };
    let profile = profile_of(&user);
    gate_sign_in(config, &profile, Some(&account), None)?;

    let session_cookies = establish_session(&profile, config).await?;
    if let Some(event) = &config.events.sign_in {
        event(&json!({
            "provider": provider.id,
            "user": {"id": user.id, "email": user.email},
        }));
    }

    let mut cleanup = Vec::new();
    let target = finish_redirect_target(request, config, &mut cleanup);
    tracing::debug!(provider = %provider.id, "Email sign-in completed");
    Ok(ResponseInternal::redirect(target)
        .with_cookies(session_cookies)
        .with_cookies(cleanup))
}

/// Find or create the user behind a verified e-mail address, stamping
/// `email_verified` on first creation.
async fn upsert_email_user(
    identifier: &str,
    adapter: &dyn Adapter,
) -> Result<AdapterUser, AuthError> {
    if let Some(user) = adapter.get_user_by_email(identifier).await? {
        return Ok(user);
    }
    let user = adapter
        .create_user(AdapterUser {
            id: uuid::Uuid::new_v4().to_string(),
            name: None,
            email: Some(identifier.to_string()),
            image: None,
            email_verified: Some(Utc::now()),
        })
        .await?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::adapter::MemoryAdapter;
    use crate::test_utils::{test_config, test_request_with_cookies};

    fn capture_provider(sent: Arc<Mutex<Vec<VerificationRequest>>>) -> EmailProvider {
        EmailProvider::new(Arc::new(move |request| {
            let sent = sent.clone();
            Box::pin(async move {
                sent.lock().unwrap().push(request);
                Ok(())
            })
        }))
    }

    fn failing_provider() -> EmailProvider {
        EmailProvider::new(Arc::new(|_| {
            Box::pin(async { Err(EmailError::Delivery("smtp down".to_string())) })
        }))
    }

    #[tokio::test]
    async fn test_signin_persists_hash_and_sends_plaintext() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let adapter = Arc::new(MemoryAdapter::new());
        let config = test_config().with_adapter(adapter.clone());
        let provider = capture_provider(sent.clone());

        let request = test_request_with_cookies(
            "/api/auth/signin/email?email=u%40example.com&callbackUrl=%2Fwelcome",
            &[],
        );
        let response = handle_email_signin(&request, &provider, &config).await.unwrap();
        assert_eq!(
            response.redirect.as_deref(),
            Some("https://app.example/api/auth/verify-request?provider=email&type=email")
        );

        let delivered = sent.lock().unwrap().pop().expect("one message sent");
        assert_eq!(delivered.identifier, "u@example.com");
        assert!(delivered.url.contains(&format!("token={}", delivered.token)));

        // The stored token is the hash, not the plaintext.
        let hashed = token_hash(&delivered.token, &config.secret);
        assert!(adapter
            .use_verification_token("u@example.com", &hashed)
            .await
            .unwrap()
            .is_some());
        assert!(adapter
            .use_verification_token("u@example.com", &delivered.token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_signin_rejects_bad_identifier_and_missing_adapter() {
        let config = test_config().with_adapter(Arc::new(MemoryAdapter::new()));
        let provider = capture_provider(Arc::new(Mutex::new(Vec::new())));

        let request =
            test_request_with_cookies("/api/auth/signin/email?email=not-an-address", &[]);
        assert!(matches!(
            handle_email_signin(&request, &provider, &config).await,
            Err(AuthError::EmailSignIn(_))
        ));

        let no_adapter = test_config();
        let request =
            test_request_with_cookies("/api/auth/signin/email?email=u%40example.com", &[]);
        assert!(matches!(
            handle_email_signin(&request, &provider, &no_adapter).await,
            Err(AuthError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_delivery_failure_surfaces_as_email_error() {
        let config = test_config().with_adapter(Arc::new(MemoryAdapter::new()));
        let request =
            test_request_with_cookies("/api/auth/signin/email?email=u%40example.com", &[]);
        assert!(matches!(
            handle_email_signin(&request, &failing_provider(), &config).await,
            Err(AuthError::EmailSignIn(_))
        ));
    }

    #[tokio::test]
    async fn test_callback_roundtrip_and_single_use() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let adapter = Arc::new(MemoryAdapter::new());
        let config = test_config().with_adapter(adapter.clone());
        let provider = capture_provider(sent.clone());

        let signin = test_request_with_cookies(
            "/api/auth/signin/email?email=u%40example.com",
            &[],
        );
        handle_email_signin(&signin, &provider, &config).await.unwrap();
        let delivered = sent.lock().unwrap().pop().unwrap();

        let callback_path = format!(
            "/api/auth/callback/email?token={}&email=u%40example.com",
            delivered.token
        );
        let callback = test_request_with_cookies(&callback_path, &[]);
        let response = handle_email_callback(&callback, &provider, &config).await.unwrap();
        assert_eq!(response.redirect.as_deref(), Some("https://app.example"));
        assert!(response
            .cookies
            .iter()
            .any(|c| c.name == config.cookies.session_token.name));

        let user = adapter
            .get_user_by_email("u@example.com")
            .await
            .unwrap()
            .expect("user created on first verification");
        assert!(user.email_verified.is_some());

        // Replaying the link fails: the token was consumed.
        assert!(matches!(
            handle_email_callback(&callback, &provider, &config).await,
            Err(AuthError::Verification)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let adapter = Arc::new(MemoryAdapter::new());
        let config = test_config().with_adapter(adapter.clone());
        let provider = capture_provider(Arc::new(Mutex::new(Vec::new())));

        adapter
            .create_verification_token(VerificationToken {
                identifier: "u@example.com".to_string(),
                token: token_hash("stale-token", &config.secret),
                expires: Utc::now() - Duration::hours(1),
            })
            .await
            .unwrap();

        let callback = test_request_with_cookies(
            "/api/auth/callback/email?token=stale-token&email=u%40example.com",
            &[],
        );
        assert!(matches!(
            handle_email_callback(&callback, &provider, &config).await,
            Err(AuthError::Verification)
        ));
    }

    #[tokio::test]
    async fn test_otp_generator_used_for_token() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let adapter = Arc::new(MemoryAdapter::new());
        let config = test_config().with_adapter(adapter);
        let provider = capture_provider(sent.clone())
            .with_generate_token(Arc::new(|| "123456".to_string()));

        let request =
            test_request_with_cookies("/api/auth/signin/email?email=u%40example.com", &[]);
        handle_email_signin(&request, &provider, &config).await.unwrap();
        assert_eq!(sent.lock().unwrap()[0].token, "123456");
    }
}
