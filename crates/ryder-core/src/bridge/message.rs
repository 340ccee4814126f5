// ── Socket messages ──
//
// Browser ⇄ worker JSON envelopes: `{op, data}` inbound, `{event, data}`
// outbound. Inbound messages that are malformed or miss required fields
// parse to `None` and are dropped without a reply.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::auth::DecodedToken;

// ── Inbound ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Parameters of an app key request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppKeyRequest {
    pub domain_name: String,
    pub token_public_key: String,
    pub identity_public_key: String,
    pub identity_number: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `data` is the query string of the auth URL; `None` when absent or
    /// empty.
    AuthRequest { data: Option<String> },
    ListIdentities,
    RequestAppAuthPrivateKey(AppKeyRequest),
}

impl Inbound {
    /// Parse a text frame. Invalid JSON is an error; well-formed JSON that
    /// is not a usable request is `Ok(None)`.
    pub fn parse(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let Some(op) = envelope.op else {
            return Ok(None);
        };

        Ok(match op.as_str() {
            "auth_request" => Some(Self::AuthRequest {
                data: envelope
                    .data
                    .as_ref()
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned),
            }),
            "list_identities" => Some(Self::ListIdentities),
            "request_app_auth_private_key" => envelope
                .data
                .as_ref()
                .and_then(AppKeyRequest::from_value)
                .map(Self::RequestAppAuthPrivateKey),
            _ => None,
        })
    }
}

impl AppKeyRequest {
    fn from_value(data: &Value) -> Option<Self> {
        let text = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };
        let identity_number = data
            .get("identity_number")
            .and_then(Value::as_u64)
            .and_then(|n| u8::try_from(n).ok())?;

        Some(Self {
            domain_name: text("domain_name")?,
            token_public_key: text("token_public_key")?,
            identity_public_key: text("identity_public_key")?,
            identity_number,
        })
    }
}

// ── Outbound ─────────────────────────────────────────────────────

/// Why an auth request was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    MissingData,
    VerificationFailed,
    RedirectMismatch,
}

/// One identity as shown in the identity selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub number: u8,
    pub address: String,
    pub names: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Outbound {
    InvalidAuthRequest(InvalidReason),
    Redirect(String),
    Auth(DecodedToken),
    Identity(Identity),
    /// The signed auth response, or `false` when the device declined or
    /// failed.
    AppAuthPrivateKey(#[serde(serialize_with = "token_or_false")] Option<String>),
}

#[allow(clippy::ref_option)]
fn token_or_false<S: Serializer>(token: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match token {
        Some(token) => serializer.serialize_str(token),
        None => serializer.serialize_bool(false),
    }
}

impl Outbound {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
