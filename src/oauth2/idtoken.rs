//! OIDC ID-token verification against the provider's JWKS.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;

use super::OAuth2Error;
use super::client::OAuthHttp;
use crate::providers::OAuthProvider;

#[derive(Debug, Deserialize)]
pub(crate) struct Jwks {
    pub(crate) keys: Vec<Jwk>,
}

/// The subset of RFC 7517 we need for RSA and EC signature keys.
#[derive(Debug, Deserialize)]
pub(crate) struct Jwk {
    pub(crate) kty: String,
    pub(crate) kid: Option<String>,
    #[serde(rename = "use")]
    pub(crate) key_use: Option<String>,
    pub(crate) n: Option<String>,
    pub(crate) e: Option<String>,
    pub(crate) crv: Option<String>,
    pub(crate) x: Option<String>,
    pub(crate) y: Option<String>,
}

/// Pick the signing key for a token. When the header carries a `kid` the key
/// ids must match; otherwise any signature-capable key of the right type is
/// eligible.
pub(crate) fn find_jwk<'a>(jwks: &'a Jwks, kid: Option<&str>, kty: &str) -> Option<&'a Jwk> {
    jwks.keys
        .iter()
        .filter(|k| k.kty == kty)
        .filter(|k| k.key_use.as_deref().is_none_or(|u| u == "sig"))
        .find(|k| match (kid, k.kid.as_deref()) {
            (Some(wanted), Some(have)) => wanted == have,
            (Some(_), None) => false,
            (None, _) => true,
        })
}

fn decoding_key(jwk: &Jwk) -> Result<DecodingKey, OAuth2Error> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk
                .n
                .as_deref()
                .ok_or_else(|| OAuth2Error::IdToken("RSA jwk missing modulus".to_string()))?;
            let e = jwk
                .e
                .as_deref()
                .ok_or_else(|| OAuth2Error::IdToken("RSA jwk missing exponent".to_string()))?;
            DecodingKey::from_rsa_components(n, e)
                .map_err(|e| OAuth2Error::IdToken(format!("invalid RSA jwk: {e}")))
        }
        "EC" => {
            let x = jwk
                .x
                .as_deref()
                .ok_or_else(|| OAuth2Error::IdToken("EC jwk missing x coordinate".to_string()))?;
            let y = jwk
                .y
                .as_deref()
                .ok_or_else(|| OAuth2Error::IdToken("EC jwk missing y coordinate".to_string()))?;
            DecodingKey::from_ec_components(x, y)
                .map_err(|e| OAuth2Error::IdToken(format!("invalid EC jwk: {e}")))
        }
        other => Err(OAuth2Error::IdToken(format!(
            "unsupported jwk key type: {other}"
        ))),
    }
}

fn algorithms_for(kty: &str, crv: Option<&str>) -> Result<Vec<Algorithm>, OAuth2Error> {
    match kty {
        "RSA" => Ok(vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512]),
        "EC" => match crv {
            Some("P-256") | None => Ok(vec![Algorithm::ES256]),
            Some("P-384") => Ok(vec![Algorithm::ES384]),
            Some(other) => Err(OAuth2Error::IdToken(format!("unsupported curve: {other}"))),
        },
        other => Err(OAuth2Error::IdToken(format!(
            "unsupported jwk key type: {other}"
        ))),
    }
}

/// Compare the `nonce` claim against the expected value from the check
/// cookie. Both sides must be present when a nonce was issued.
pub(crate) fn check_nonce(
    claims: &Map<String, Value>,
    expected_nonce: Option<&str>,
) -> Result<(), OAuth2Error> {
    match expected_nonce {
        None => Ok(()),
        Some(expected) => {
            let claimed = claims
                .get("nonce")
                .and_then(Value::as_str)
                .ok_or(OAuth2Error::NonceMismatch)?;
            if bool::from(claimed.as_bytes().ct_eq(expected.as_bytes())) {
                Ok(())
            } else {
                Err(OAuth2Error::NonceMismatch)
            }
        }
    }
}

/// Verify an ID token: fetch the provider's JWKS, check the signature with a
/// pinned algorithm family, validate `iss`/`aud`/`exp`, then compare the
/// nonce. Returns the claims for profile mapping.
pub(crate) async fn verify_id_token(
    id_token: &str,
    provider: &OAuthProvider,
    expected_nonce: Option<&str>,
    http: &dyn OAuthHttp,
) -> Result<Map<String, Value>, OAuth2Error> {
    let issuer = provider
        .issuer
        .as_deref()
        .ok_or_else(|| OAuth2Error::IdToken("provider has no issuer configured".to_string()))?;
    let jwks_endpoint = provider
        .jwks_endpoint
        .as_ref()
        .ok_or_else(|| OAuth2Error::IdToken("provider has no jwks endpoint".to_string()))?;

    let header =
        decode_header(id_token).map_err(|e| OAuth2Error::IdToken(format!("bad header: {e}")))?;
    let kty = match header.alg {
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => "RSA",
        Algorithm::ES256 | Algorithm::ES384 => "EC",
        other => {
            return Err(OAuth2Error::IdToken(format!(
                "refusing token algorithm {other:?}"
            )));
        }
    };

    let jwks_body = http
        .get_json(jwks_endpoint, None)
        .await
        .map_err(|e| OAuth2Error::IdToken(format!("jwks fetch failed: {e}")))?;
    let jwks: Jwks = serde_json::from_value(jwks_body)
        .map_err(|e| OAuth2Error::IdToken(format!("invalid jwks document: {e}")))?;

    let jwk = find_jwk(&jwks, header.kid.as_deref(), kty)
        .ok_or_else(|| OAuth2Error::IdToken("no matching key in jwks".to_string()))?;
    let key = decoding_key(jwk)?;

    let mut validation = Validation::new(header.alg);
    validation.algorithms = algorithms_for(kty, jwk.crv.as_deref())?;
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[provider.client_id.as_str()]);
    validation.set_required_spec_claims(&["exp", "iss", "aud"]);

    let data = decode::<Map<String, Value>>(id_token, &key, &validation)
        .map_err(|e| OAuth2Error::IdToken(format!("verification failed: {e}")))?;

    check_nonce(&data.claims, expected_nonce)?;
    Ok(data.claims)
}
