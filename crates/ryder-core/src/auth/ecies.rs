// ── ECIES ──
//
// Encrypts the app private key to the requesting app's transit key, in
// the cipher-object format Blockstack apps decrypt: ephemeral secp256k1
// ECDH, SHA-512 of the shared x coordinate split into an AES-256-CBC key
// and an HMAC-SHA256 key.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::error::CoreError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const IV_LEN: usize = 16;

/// Serialized form of an ECIES payload. All binary fields are hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherObject {
    pub iv: String,
    #[serde(rename = "ephemeralPK")]
    pub ephemeral_pk: String,
    pub cipher_text: String,
    pub mac: String,
    pub was_string: bool,
}

fn parse_public_key(public_key_hex: &str) -> Result<PublicKey, CoreError> {
    let bytes = hex::decode(public_key_hex)
        .map_err(|e| CoreError::token(format!("transit key is not hex: {e}")))?;
    PublicKey::from_sec1_bytes(&bytes)
        .map_err(|e| CoreError::token(format!("invalid transit key: {e}")))
}

/// Returns `(encryption key, mac key)`.
fn derive_keys(secret: &SecretKey, public: &PublicKey) -> ([u8; 32], [u8; 32]) {
    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let hashed = Sha512::digest(shared.raw_secret_bytes());
    let mut enc_key = [0u8; 32];
    let mut mac_key = [0u8; 32];
    enc_key.copy_from_slice(&hashed[..32]);
    mac_key.copy_from_slice(&hashed[32..]);
    (enc_key, mac_key)
}

fn mac_over(mac_key: &[u8], iv: &[u8], ephemeral_pk: &[u8], cipher_text: &[u8]) -> Result<Vec<u8>, CoreError> {
    let mut mac = HmacSha256::new_from_slice(mac_key)
        .map_err(|e| CoreError::Internal(format!("hmac key: {e}")))?;
    mac.update(iv);
    mac.update(ephemeral_pk);
    mac.update(cipher_text);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Encrypt `plaintext` to the secp256k1 public key `public_key_hex`.
pub fn encrypt(public_key_hex: &str, plaintext: &[u8], was_string: bool) -> Result<CipherObject, CoreError> {
    let recipient = parse_public_key(public_key_hex)?;
    let ephemeral = SecretKey::random(&mut OsRng);
    let ephemeral_pk = ephemeral.public_key().to_encoded_point(true);
    let (enc_key, mac_key) = derive_keys(&ephemeral, &recipient);

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let cipher_text = Aes256CbcEnc::new_from_slices(&enc_key, &iv)
        .map_err(|e| CoreError::Internal(format!("aes key: {e}")))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let mac = mac_over(&mac_key, &iv, ephemeral_pk.as_bytes(), &cipher_text)?;

    Ok(CipherObject {
        iv: hex::encode(iv),
        ephemeral_pk: hex::encode(ephemeral_pk.as_bytes()),
        cipher_text: hex::encode(cipher_text),
        mac: hex::encode(mac),
        was_string,
    })
}

/// Encrypt an app private key for transport in an auth response: the
/// cipher object as JSON, hex encoded.
pub fn encrypt_private_key(public_key_hex: &str, private_key: &str) -> Result<String, CoreError> {
    let object = encrypt(public_key_hex, private_key.as_bytes(), true)?;
    let json = serde_json::to_string(&object)
        .map_err(|e| CoreError::Internal(format!("cipher object: {e}")))?;
    Ok(hex::encode(json))
}

#[cfg(test)]
pub(crate) fn decrypt(secret: &SecretKey, object: &CipherObject) -> Result<Vec<u8>, CoreError> {
    use aes::cipher::BlockDecryptMut;

    type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

    let decode = |field: &str| hex::decode(field).map_err(|e| CoreError::token(e.to_string()));
    let iv = decode(&object.iv)?;
    let ephemeral_pk = decode(&object.ephemeral_pk)?;
    let cipher_text = decode(&object.cipher_text)?;
    let ephemeral = PublicKey::from_sec1_bytes(&ephemeral_pk)
        .map_err(|e| CoreError::token(e.to_string()))?;

    let (enc_key, mac_key) = derive_keys(secret, &ephemeral);
    if hex::encode(mac_over(&mac_key, &iv, &ephemeral_pk, &cipher_text)?) != object.mac {
        return Err(CoreError::token("mac mismatch"));
    }
    Aes256CbcDec::new_from_slices(&enc_key, &iv)
        .map_err(|e| CoreError::Internal(e.to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(&cipher_text)
        .map_err(|e| CoreError::token(e.to_string()))
}
