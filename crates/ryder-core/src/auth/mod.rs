//! Blockstack auth token protocol.
//!
//! The bridge consumes three operations from the identity-provider
//! protocol: verifying an inbound auth request, decoding it, and building
//! a signed auth response. [`AuthProtocol`] is the seam; [`BlockstackAuth`]
//! is the ES256K implementation.

pub mod address;
pub mod ecies;
pub mod token;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CoreError;

pub use token::BlockstackAuth;

// ── Decoded tokens ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenHeader {
    #[serde(default)]
    pub typ: String,
    pub alg: String,
}

/// Claims of an inbound auth request. Unknown claims are carried through
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequestPayload {
    #[serde(default)]
    pub domain_name: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_uri: Option<String>,
    #[serde(default)]
    pub public_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<serde_json::Number>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A compact JWT split into its parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedToken {
    pub header: TokenHeader,
    pub payload: AuthRequestPayload,
    pub signature: String,
}

// ── Auth responses ───────────────────────────────────────────────

/// Inputs for a signed auth response.
#[derive(Debug, Clone)]
pub struct AuthResponseParams {
    /// Signs the response; its public key is advertised in `public_keys`.
    pub owner_private_key: SecretString,
    /// Delivered to the app, encrypted to `transit_public_key`.
    pub app_private_key: SecretString,
    pub username: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub transit_public_key: Option<String>,
    pub hub_url: Url,
    pub api_url: Url,
}

// ── Protocol seam ────────────────────────────────────────────────

pub trait AuthProtocol: Send + Sync {
    /// `true` when the token is well-formed, signed by its only public
    /// key, issued by that key's address, within its validity window, and
    /// its manifest and redirect URIs share the origin of its domain.
    fn verify_auth_request(&self, token: &str) -> bool;

    fn decode(&self, token: &str) -> Result<DecodedToken, CoreError>;

    fn make_auth_response(&self, params: &AuthResponseParams) -> Result<String, CoreError>;
}
