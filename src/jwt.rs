//! Session-token and check-cookie JWT encode/decode.
//!
//! All cookies that carry protocol state (the stateless session token and
//! the state/pkce/nonce check cookies) are HS256 JWTs. The signing key is
//! derived from the configured secret with an HKDF-SHA256 construction
//! salted by the cookie name, so a token minted for one cookie cannot be
//! replayed as another.

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::{Map, Value, json};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    Encode(String),

    #[error("Token decoding failed: {0}")]
    Decode(String),

    #[error("Token expired")]
    Expired,
}

/// HKDF-SHA256 extract-and-expand, single block (32 bytes).
pub(crate) fn derive_signing_key(secret: &str, salt: &str) -> Vec<u8> {
    let mut extract =
        HmacSha256::new_from_slice(salt.as_bytes()).expect("HMAC accepts keys of any length");
    extract.update(secret.as_bytes());
    let prk = extract.finalize().into_bytes();

    let mut expand =
        HmacSha256::new_from_slice(&prk).expect("HMAC accepts keys of any length");
    expand.update(format!("authcore derived signing key ({salt})").as_bytes());
    expand.update(&[0x01]);
    expand.finalize().into_bytes().to_vec()
}

/// Sign `claims`, setting `iat`, `exp` (`now + max_age` seconds) and a
/// `jti`. Caller-provided `exp`/`iat` are overwritten; a caller `jti` is
/// kept so refreshes preserve token identity.
pub fn encode_jwt(
    mut claims: Map<String, Value>,
    secret: &str,
    salt: &str,
    max_age: i64,
) -> Result<String, JwtError> {
    let now = Utc::now();
    claims.insert("iat".to_string(), json!(now.timestamp()));
    claims.insert(
        "exp".to_string(),
        json!((now + Duration::seconds(max_age)).timestamp()),
    );
    claims
        .entry("jti".to_string())
        .or_insert_with(|| json!(Uuid::new_v4().to_string()));

    encode(
        &Header::new(Algorithm::HS256),
        &Value::Object(claims),
        &EncodingKey::from_secret(&derive_signing_key(secret, salt)),
    )
    .map_err(|e| JwtError::Encode(e.to_string()))
}

/// Verify signature and expiry, returning the claims object.
pub fn decode_jwt(token: &str, secret: &str, salt: &str) -> Result<Map<String, Value>, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    let data = decode::<Value>(
        token,
        &DecodingKey::from_secret(&derive_signing_key(secret, salt)),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
        _ => JwtError::Decode(e.to_string()),
    })?;

    match data.claims {
        Value::Object(map) => Ok(map),
        _ => Err(JwtError::Decode("claims are not an object".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "a-test-secret-that-is-long-enough-000";

    fn claims(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let token = encode_jwt(
            claims(&[("sub", "user-1"), ("email", "u@example.com")]),
            SECRET,
            "authcore.session-token",
            3600,
        )
        .unwrap();
        let decoded = decode_jwt(&token, SECRET, "authcore.session-token").unwrap();
        assert_eq!(decoded["sub"], "user-1");
        assert_eq!(decoded["email"], "u@example.com");
        assert!(decoded["exp"].as_i64().unwrap() > Utc::now().timestamp());
        assert!(decoded.contains_key("jti"));
    }

    #[test]
    fn test_salt_binds_token_to_cookie() {
        let token = encode_jwt(claims(&[("value", "s")]), SECRET, "authcore.state", 900).unwrap();
        // A state cookie token must not verify as a nonce cookie token.
        let result = decode_jwt(&token, SECRET, "authcore.nonce");
        assert!(matches!(result, Err(JwtError::Decode(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = encode_jwt(claims(&[("sub", "u")]), SECRET, "salt", 3600).unwrap();
        assert!(matches!(
            decode_jwt(&token, "another-secret-another-secret-12", "salt"),
            Err(JwtError::Decode(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = encode_jwt(claims(&[("sub", "u")]), SECRET, "salt", -10).unwrap();
        assert!(matches!(
            decode_jwt(&token, SECRET, "salt"),
            Err(JwtError::Expired)
        ));
    }

    #[test]
    fn test_derived_keys_differ_per_salt() {
        let a = derive_signing_key(SECRET, "authcore.session-token");
        let b = derive_signing_key(SECRET, "authcore.state");
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }
}
