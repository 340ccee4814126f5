// ── ES256K tokens ──
//
// Compact JWTs signed with secp256k1 over SHA-256, as used by the
// Blockstack auth flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{Number, json};
use tracing::debug;
use url::Url;

use super::{AuthProtocol, AuthResponseParams, DecodedToken, TokenHeader, address, ecies};
use crate::error::CoreError;

pub const ALGORITHM: &str = "ES256K";

/// Auth response format version understood by Blockstack apps.
pub const AUTH_RESPONSE_VERSION: &str = "1.3.1";

/// Hex length of a private key carrying the compressed-key suffix `01`.
const SUFFIXED_KEY_LEN: usize = 66;

/// ES256K implementation of [`AuthProtocol`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockstackAuth;

impl BlockstackAuth {
    pub fn new() -> Self {
        Self
    }
}

// ── Keys ─────────────────────────────────────────────────────────

/// Parse a hex private key, accepting the `01` compressed suffix.
pub fn signing_key(private_key_hex: &str) -> Result<SigningKey, CoreError> {
    let trimmed = if private_key_hex.len() == SUFFIXED_KEY_LEN {
        private_key_hex.strip_suffix("01").unwrap_or(private_key_hex)
    } else {
        private_key_hex
    };
    let bytes = hex::decode(trimmed).map_err(|e| CoreError::token(format!("private key is not hex: {e}")))?;
    SigningKey::from_slice(&bytes).map_err(|e| CoreError::token(format!("invalid private key: {e}")))
}

/// Compressed SEC1 public key of `key`, hex encoded.
pub fn public_key_hex(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_encoded_point(true).as_bytes())
}

// ── Encoding ─────────────────────────────────────────────────────

fn encode_segment<T: Serialize + ?Sized>(value: &T) -> Result<String, CoreError> {
    let bytes =
        serde_json::to_vec(value).map_err(|e| CoreError::token(format!("serialize claims: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Sign `payload` as a compact ES256K JWT.
pub fn sign_token<T: Serialize + ?Sized>(payload: &T, key: &SigningKey) -> Result<String, CoreError> {
    let header = json!({ "typ": "JWT", "alg": ALGORITHM });
    let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(payload)?);
    let signature: Signature = key.sign(signing_input.as_bytes());
    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

struct RawToken<'a> {
    signing_input: &'a str,
    header: &'a str,
    payload: &'a str,
    signature: &'a str,
}

fn split_token(token: &str) -> Result<RawToken<'_>, CoreError> {
    let (signing_input, signature) = token
        .rsplit_once('.')
        .ok_or_else(|| CoreError::token("token has no signature"))?;
    let (header, payload) = signing_input
        .split_once('.')
        .ok_or_else(|| CoreError::token("token has no payload"))?;
    if payload.contains('.') {
        return Err(CoreError::token("token has too many segments"));
    }
    Ok(RawToken {
        signing_input,
        header,
        payload,
        signature,
    })
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str, what: &str) -> Result<T, CoreError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| CoreError::token(format!("{what} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| CoreError::token(format!("{what} is not valid JSON: {e}")))
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Same scheme, host and port.
fn same_origin(uri: &str, domain: &str) -> bool {
    match (Url::parse(uri), Url::parse(domain)) {
        (Ok(uri), Ok(domain)) => uri.origin() == domain.origin(),
        _ => false,
    }
}

impl BlockstackAuth {
    fn check(&self, token: &str) -> Result<(), CoreError> {
        let raw = split_token(token)?;
        let decoded = self.decode(token)?;
        let payload = &decoded.payload;
        if decoded.header.alg != ALGORITHM {
            return Err(CoreError::token(format!("unsupported algorithm {}", decoded.header.alg)));
        }

        let now = now_secs();
        if let Some(exp) = payload.exp.as_ref().and_then(Number::as_f64).filter(|exp| *exp > 0.0) {
            if now > exp {
                return Err(CoreError::token("auth request has expired"));
            }
        }
        if let Some(iat) = payload.iat.as_ref().and_then(Number::as_f64) {
            if now < iat {
                return Err(CoreError::token("auth request is issued in the future"));
            }
        }

        let [public_key] = payload.public_keys.as_slice() else {
            return Err(CoreError::token(format!(
                "auth request must carry exactly one public key, found {}",
                payload.public_keys.len()
            )));
        };
        let key_bytes = hex::decode(public_key).map_err(|e| CoreError::token(format!("public key is not hex: {e}")))?;
        let verifying_key = VerifyingKey::from_sec1_bytes(&key_bytes)
            .map_err(|e| CoreError::token(format!("invalid public key: {e}")))?;

        let sig_bytes = URL_SAFE_NO_PAD
            .decode(raw.signature.trim_end_matches('='))
            .map_err(|e| CoreError::token(format!("signature is not base64url: {e}")))?;
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|e| CoreError::token(format!("malformed signature: {e}")))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        verifying_key
            .verify(raw.signing_input.as_bytes(), &signature)
            .map_err(|_| CoreError::token("signature does not match public key"))?;

        let issuer = payload
            .extra
            .get("iss")
            .and_then(serde_json::Value::as_str)
            .and_then(address::address_from_did)
            .ok_or_else(|| CoreError::token("auth request has no did:btc-addr issuer"))?;
        if issuer != address::btc_address(&verifying_key) {
            return Err(CoreError::token("issuer does not match public key"));
        }

        let manifest_uri = payload.manifest_uri.as_deref().unwrap_or_default();
        if !same_origin(manifest_uri, &payload.domain_name) {
            return Err(CoreError::token("manifest uri is not on the app domain"));
        }
        if !same_origin(&payload.redirect_uri, &payload.domain_name) {
            return Err(CoreError::token("redirect uri is not on the app domain"));
        }
        Ok(())
    }
}

impl AuthProtocol for BlockstackAuth {
    fn verify_auth_request(&self, token: &str) -> bool {
        match self.check(token) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "auth request verification failed");
                false
            }
        }
    }

    fn decode(&self, token: &str) -> Result<DecodedToken, CoreError> {
        let raw = split_token(token)?;
        let header: TokenHeader = decode_segment(raw.header, "header")?;
        let payload = decode_segment(raw.payload, "payload")?;
        Ok(DecodedToken {
            header,
            payload,
            signature: raw.signature.to_owned(),
        })
    }

    fn make_auth_response(&self, params: &AuthResponseParams) -> Result<String, CoreError> {
        let owner_key = signing_key(params.owner_private_key.expose_secret())?;
        let issuer = address::did_for_address(&address::btc_address(owner_key.verifying_key()));
        let private_key = params
            .transit_public_key
            .as_deref()
            .map(|transit| ecies::encrypt_private_key(transit, params.app_private_key.expose_secret()))
            .transpose()?;

        let payload = json!({
            "jti": uuid::Uuid::new_v4().to_string(),
            "iat": Utc::now().timestamp(),
            "exp": params.expires_at.timestamp(),
            "iss": issuer,
            "private_key": private_key,
            "public_keys": [public_key_hex(&owner_key)],
            "profile": {},
            "username": params.username,
            "core_token": null,
            "email": null,
            "profile_url": null,
            "hubUrl": params.hub_url.as_str(),
            "blockstackAPIUrl": params.api_url.as_str(),
            "associationToken": null,
            "version": AUTH_RESPONSE_VERSION,
        });
        sign_token(&payload, &owner_key)
    }
}
