//! Framework-agnostic authentication engine: OAuth2/OIDC, email magic
//! links/OTP, credentials and database-backed or stateless JWT sessions
//! behind a fixed set of HTTP actions (`signin`, `callback`, `session`,
//! `signout`, `csrf`, `providers`, ...).
//!
//! The engine never binds a socket. A host (an axum handler, a lambda, a
//! test harness) normalizes its native request into [`RequestInternal`],
//! calls [`handle`] (or [`process`] for `http`-typed hosts), and translates
//! the returned [`ResponseInternal`] back. All behavior is driven by one
//! immutable [`AuthConfig`] built at startup.
//!
//! ```no_run
//! use authcore::{AuthConfig, OAuthProvider, Provider};
//! use url::Url;
//!
//! let google = Provider::Oidc(
//!     OAuthProvider::new(
//!         "google",
//!         "Google",
//!         "client-id",
//!         "client-secret",
//!         Url::parse("https://accounts.google.com/o/oauth2/v2/auth").unwrap(),
//!         Url::parse("https://oauth2.googleapis.com/token").unwrap(),
//!     )
//!     .with_issuer(
//!         "https://accounts.google.com",
//!         Url::parse("https://www.googleapis.com/oauth2/v3/certs").unwrap(),
//!     ),
//! );
//!
//! let config = AuthConfig::new(
//!     Url::parse("https://app.example").unwrap(),
//!     "an at-least-32-character signing secret!",
//!     vec![google],
//! )
//! .unwrap();
//! // Per request: authcore::process(method, url, headers, body, &config)
//! ```

mod adapter;
mod callbacks;
mod config;
mod cookie;
mod csrf;
mod email;
mod errors;
mod jwt;
mod oauth2;
mod pages;
mod providers;
mod request;
mod response;
mod router;
mod session;
#[cfg(test)]
mod test_utils;
mod utils;

pub use adapter::{
    Adapter, AdapterAccount, AdapterError, AdapterSession, AdapterUser, MemoryAdapter,
    VerificationToken,
};
pub use callbacks::{
    Callbacks, EventFn, Events, JwtFn, RedirectFn, SessionFn, SignInAttempt, SignInFn,
    contain_redirect,
};
pub use config::{AuthConfig, PagesOptions, SessionOptions, SessionStrategy};
pub use cookie::{CookieSettings, CookieTemplate, SessionStore};
pub use email::EmailError;
pub use errors::AuthError;
pub use jwt::{JwtError, decode_jwt, encode_jwt};
pub use oauth2::{HttpClientError, OAuth2Error, OAuthHttp, ReqwestHttp};
pub use providers::{
    AuthorizeFn, Check, CredentialsProvider, EmailProvider, GenerateTokenFn, OAuthProvider,
    ProfileFn, Provider, ProviderInfo, SendVerificationFn, UserProfile, VerificationRequest,
    WebAuthnProvider, default_profile,
};
pub use request::{Action, RequestInternal};
pub use response::{Body, Cookie, CookieOptions, ResponseInternal, SameSite};
pub use router::{handle, process};
