//! Cookie naming, security posture, and chunked session-cookie storage.
//!
//! Cookie names are namespaced by a prefix reflecting the security context:
//! `__Secure-` for cookies that require HTTPS, `__Host-` for the host-locked
//! CSRF cookie. A session value that exceeds [`CHUNK_SIZE`] is split across
//! numbered cookies (`name.0`, `name.1`, ...) and reassembled in numeric
//! suffix order, never in `Cookie` header order.

use crate::response::{Cookie, CookieOptions, SameSite};

/// Hard browser limit for a single cookie, name and attributes included.
pub(crate) const ALLOWED_COOKIE_SIZE: usize = 4096;

/// Estimated overhead for the cookie name plus serialized attributes.
const ESTIMATED_ATTRIBUTE_SIZE: usize = 163;

/// Maximum value size per chunk cookie.
pub(crate) const CHUNK_SIZE: usize = ALLOWED_COOKIE_SIZE - ESTIMATED_ATTRIBUTE_SIZE;

/// Name and default options for one of the engine's cookies.
#[derive(Debug, Clone)]
pub struct CookieTemplate {
    pub name: String,
    pub options: CookieOptions,
}

/// The full set of cookies the engine writes, resolved once from the
/// security posture (`secure` flips the `__Secure-`/`__Host-` prefixes and
/// the `Secure` attribute).
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub session_token: CookieTemplate,
    pub callback_url: CookieTemplate,
    pub csrf_token: CookieTemplate,
    pub pkce_code_verifier: CookieTemplate,
    pub state: CookieTemplate,
    pub nonce: CookieTemplate,
}

impl CookieSettings {
    pub fn new(secure: bool) -> Self {
        let secure_prefix = if secure { "__Secure-" } else { "" };
        let host_prefix = if secure { "__Host-" } else { "" };
        let base = |name: &str, prefix: &str| CookieTemplate {
            name: format!("{prefix}authcore.{name}"),
            options: CookieOptions {
                http_only: true,
                secure,
                path: "/".to_string(),
                same_site: SameSite::Lax,
                max_age: None,
                domain: None,
            },
        };

        Self {
            session_token: base("session-token", secure_prefix),
            callback_url: base("callback-url", secure_prefix),
            csrf_token: base("csrf-token", host_prefix),
            pkce_code_verifier: base("pkce.code_verifier", secure_prefix),
            state: base("state", secure_prefix),
            nonce: base("nonce", secure_prefix),
        }
    }
}

/// In-memory view of the possibly multi-chunk session cookie.
#[derive(Debug)]
pub struct SessionStore {
    template: CookieTemplate,
    /// Value of the unsuffixed cookie, if present.
    whole: Option<String>,
    /// `(numeric suffix, value)` for each `name.N` cookie present.
    chunks: Vec<(usize, String)>,
}

impl SessionStore {
    /// Collect the session cookie and any numbered chunks from the parsed
    /// request cookies. Non-numeric suffixes are ignored.
    pub fn new(template: &CookieTemplate, cookies: &[(String, String)]) -> Self {
        let mut whole = None;
        let mut chunks = Vec::new();
        for (name, value) in cookies {
            if name == &template.name {
                whole = Some(value.clone());
            } else if let Some(suffix) = name.strip_prefix(&format!("{}.", template.name)) {
                if let Ok(index) = suffix.parse::<usize>() {
                    chunks.push((index, value.clone()));
                }
            }
        }
        Self {
            template: template.clone(),
            whole,
            chunks,
        }
    }

    /// Reassemble the original value: the unsuffixed cookie wins, otherwise
    /// chunks concatenated in numeric order regardless of header order.
    pub fn value(&self) -> Option<String> {
        if let Some(whole) = &self.whole {
            return Some(whole.clone());
        }
        if self.chunks.is_empty() {
            return None;
        }
        let mut chunks = self.chunks.clone();
        chunks.sort_by_key(|(index, _)| *index);
        Some(chunks.into_iter().map(|(_, value)| value).collect())
    }

    /// Produce the cookies that store `value`: a single cookie when it fits
    /// in [`CHUNK_SIZE`], numbered chunks otherwise. Chunks present on the
    /// request but not rewritten are expired so stale data never lingers.
    pub fn chunk(&self, value: &str, options: &CookieOptions) -> Vec<Cookie> {
        let mut cookies = Vec::new();
        let mut written: Vec<String> = Vec::new();

        if value.len() <= CHUNK_SIZE {
            cookies.push(Cookie::new(&self.template.name, value, options.clone()));
            written.push(self.template.name.clone());
        } else {
            for (index, piece) in split_chunks(value).into_iter().enumerate() {
                let name = format!("{}.{}", self.template.name, index);
                cookies.push(Cookie::new(&name, piece, options.clone()));
                written.push(name);
            }
            if value.len() > ALLOWED_COOKIE_SIZE * 5 {
                tracing::warn!(
                    "Session cookie exceeds {} chunks; consider trimming the token payload",
                    cookies.len()
                );
            }
        }

        for name in self.present_names() {
            if !written.contains(&name) {
                cookies.push(Cookie::expired(name, &self.template.options));
            }
        }
        cookies
    }

    /// One zero-max-age cookie per chunk actually present, guaranteeing all
    /// chunks are cleared on logout.
    pub fn clean(&self) -> Vec<Cookie> {
        self.present_names()
            .into_iter()
            .map(|name| Cookie::expired(name, &self.template.options))
            .collect()
    }

    fn present_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.whole.is_some() {
            names.push(self.template.name.clone());
        }
        for (index, _) in &self.chunks {
            names.push(format!("{}.{}", self.template.name, index));
        }
        names
    }
}

/// Split on char boundaries at most `CHUNK_SIZE` bytes apart.
fn split_chunks(mut value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    while value.len() > CHUNK_SIZE {
        let mut at = CHUNK_SIZE;
        while !value.is_char_boundary(at) {
            at -= 1;
        }
        let (head, tail) = value.split_at(at);
        out.push(head);
        value = tail;
    }
    out.push(value);
    out
}
