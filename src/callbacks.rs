//! User-supplied callbacks and event hooks.
//!
//! Callbacks customize the protocol at fixed seams: `sign_in` gates who may
//! authenticate, `redirect` clamps post-login targets, `jwt` shapes the
//! stateless session token, `session` shapes the `GET /session` payload.
//! All are optional except `redirect`, which defaults to origin containment.

use std::sync::Arc;

use serde_json::{Map, Value};
use url::Url;

use crate::adapter::AdapterAccount;
use crate::providers::UserProfile;

/// What the `sign_in` callback gets to inspect.
pub struct SignInAttempt<'a> {
    pub user: &'a UserProfile,
    pub account: Option<&'a AdapterAccount>,
    /// Raw provider payload (ID-token claims or userinfo) for OAuth flows.
    pub profile: Option<&'a Value>,
}

/// Return `Ok(false)` to deny the sign-in (surfaced as `AccessDenied`), or
/// `Err` to abort with a configuration error.
pub type SignInFn = Arc<dyn Fn(&SignInAttempt<'_>) -> Result<bool, String> + Send + Sync>;

/// Maps a requested callback URL to the one actually used.
pub type RedirectFn = Arc<dyn Fn(&str, &Url) -> String + Send + Sync>;

/// Transforms the session-token claims. The second argument carries the
/// freshly authenticated user on initial sign-in and `None` on refresh.
pub type JwtFn =
    Arc<dyn Fn(Map<String, Value>, Option<&UserProfile>) -> Map<String, Value> + Send + Sync>;

/// Transforms the `GET /session` response body given the token claims.
pub type SessionFn = Arc<dyn Fn(Value, &Map<String, Value>) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct Callbacks {
    pub sign_in: Option<SignInFn>,
    pub redirect: RedirectFn,
    pub jwt: Option<JwtFn>,
    pub session: Option<SessionFn>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            sign_in: None,
            redirect: Arc::new(contain_redirect),
            jwt: None,
            session: None,
        }
    }
}

/// Default `redirect` callback: relative paths resolve against the base
/// origin, same-origin absolute URLs pass through, everything else is
/// clamped back to the base URL. Protocol-relative URLs (`//evil.example`)
/// count as foreign.
pub fn contain_redirect(url: &str, base_url: &Url) -> String {
    let url = url.trim();
    let origin = base_url.origin().ascii_serialization();

    if url.is_empty() {
        return base_url.as_str().trim_end_matches('/').to_string();
    }
    if url.starts_with("//") {
        tracing::debug!("Clamping protocol-relative redirect target");
        return base_url.as_str().trim_end_matches('/').to_string();
    }
    if url.starts_with('/') {
        return format!("{origin}{url}");
    }
    match Url::parse(url) {
        Ok(parsed) if parsed.origin() == base_url.origin() => url.to_string(),
        _ => {
            tracing::debug!("Clamping cross-origin redirect target");
            base_url.as_str().trim_end_matches('/').to_string()
        }
    }
}

/// Fired after state changes; receives a JSON description of the event.
pub type EventFn = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Events {
    pub sign_in: Option<EventFn>,
    pub sign_out: Option<EventFn>,
    pub create_user: Option<EventFn>,
}
