// ── Bitcoin addresses and DIDs ──
//
// Blockstack identifies token issuers as `did:btc-addr:<address>`, where
// the address is the base58check P2PKH address of the compressed key.

use k256::ecdsa::VerifyingKey;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::CoreError;

const DID_BTC_ADDR_PREFIX: &str = "did:btc-addr:";

/// Mainnet P2PKH version byte.
const P2PKH_VERSION: u8 = 0x00;

/// Base58check address of `key` (compressed encoding).
pub fn btc_address(key: &VerifyingKey) -> String {
    let sha = Sha256::digest(key.to_encoded_point(true).as_bytes());
    let hash = Ripemd160::digest(sha);
    bs58::encode(hash)
        .with_check_version(P2PKH_VERSION)
        .into_string()
}

/// Address of a hex-encoded SEC1 public key.
pub fn btc_address_from_hex(public_key_hex: &str) -> Result<String, CoreError> {
    let bytes = hex::decode(public_key_hex)
        .map_err(|e| CoreError::token(format!("public key is not hex: {e}")))?;
    let key = VerifyingKey::from_sec1_bytes(&bytes)
        .map_err(|e| CoreError::token(format!("invalid public key: {e}")))?;
    Ok(btc_address(&key))
}

pub fn did_for_address(address: &str) -> String {
    format!("{DID_BTC_ADDR_PREFIX}{address}")
}

/// The address inside a `did:btc-addr:` DID. Other DID methods yield `None`.
pub fn address_from_did(did: &str) -> Option<&str> {
    did.strip_prefix(DID_BTC_ADDR_PREFIX).filter(|a| !a.is_empty())
}
