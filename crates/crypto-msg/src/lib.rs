//! Envelope sealing backend for the messaging overlay.
//!
//! This crate is the one boundary the core messaging engine does not
//! reimplement: it owns the elliptic-curve primitives (secp256k1 ECDH +
//! ECDSA) and the symmetric sealing (AES-256-GCM) used to build and open
//! the binary envelope described by the core's `EnvelopeCodec`. A
//! different curve or cipher suite can be swapped in by implementing
//! [`CryptoMsg`] and handing the core a different instance; nothing
//! upstream of the trait needs to change.

mod envelope;
mod wire;

use rand::RngCore;
use secp256k1::{ecdh, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

pub use envelope::{BuildEnvelopeRequest, BuiltEnvelope, EnvelopeKind};

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("envelope is malformed: {0}")]
    MalformedEnvelope(String),
    #[error("ciphertext is not addressed to this recipient")]
    NotAddressedToUs,
    #[error("signature verification failed")]
    BadSignature,
    #[error("recipient list is empty")]
    NoRecipients,
}

/// The crypto boundary the core depends on. `§4.4`/`§6` of the design
/// document enumerate exactly these six operations.
pub trait CryptoMsg: Send + Sync {
    fn build_envelope(&self, req: BuildEnvelopeRequest) -> Result<BuiltEnvelope, CryptoError>;
    fn open_envelope(
        &self,
        encrypted_payload_hex: &str,
        recipient_private_key_hex: &str,
    ) -> Result<String, CryptoError>;
    fn wrap_for_pool(
        &self,
        payload_hex: &str,
        pool_pubkey_hex: &str,
        sender_address: &str,
    ) -> Result<String, CryptoError>;
    fn unwrap_from_pool(
        &self,
        encrypted_hex: &str,
        recipient_private_key_hex: &str,
    ) -> Result<String, CryptoError>;
    fn hash160(&self, bytes: &[u8]) -> [u8; 20] {
        utils::hash160(bytes)
    }
    fn hex_to_bytes(&self, s: &str) -> Result<Vec<u8>, CryptoError> {
        utils::hex_to_bytes(s)
    }
    fn bytes_to_hex(&self, bytes: &[u8]) -> String {
        utils::bytes_to_hex(bytes)
    }
}

/// Free-standing helpers mirroring the trait's `hash160`/hex operations,
/// usable by callers that only need the utility and not a full backend
/// (e.g. the recipient directory hashing pubkeys it already has in hand).
pub mod utils {
    use super::CryptoError;
    use ripemd::Ripemd160;
    use sha2::{Digest, Sha256};

    pub fn hash160(bytes: &[u8]) -> [u8; 20] {
        let sha = Sha256::digest(bytes);
        let rmd = Ripemd160::digest(sha);
        let mut out = [0u8; 20];
        out.copy_from_slice(&rmd);
        out
    }

    pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>, CryptoError> {
        hex::decode(s).map_err(|e| CryptoError::InvalidHex(e.to_string()))
    }

    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        hex::encode(bytes)
    }
}

/// Real secp256k1/AES-256-GCM implementation of [`CryptoMsg`].
#[derive(Clone, Copy, Default)]
pub struct Secp256k1CryptoMsg;

impl Secp256k1CryptoMsg {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Serialize, Deserialize)]
struct WrappedKeyPlain {
    #[serde(with = "hex_bytes")]
    message_key: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

fn secret_key_from_hex(hex_str: &str) -> Result<SecretKey, CryptoError> {
    let bytes = utils::hex_to_bytes(hex_str)?;
    SecretKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

fn pubkey_from_hex(hex_str: &str) -> Result<PublicKey, CryptoError> {
    let bytes = utils::hex_to_bytes(hex_str)?;
    PublicKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Derive a 32-byte AES key from an ECDH shared point the same way for
/// every caller: sha256 of the compressed shared-secret encoding.
fn derive_aes_key(shared: &ecdh::SharedSecret) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"xna-messenger-ecdh");
    hasher.update(shared.secret_bytes());
    hasher.finalize().into()
}

fn aes_seal(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    use aes_gcm::{
        aead::{Aead, KeyInit},
        Aes256Gcm, Nonce,
    };
    let cipher = Aes256Gcm::new_from_slice(key).expect("32-byte key");
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ct = cipher
        .encrypt(nonce, plaintext)
        .expect("encryption does not fail for AES-GCM with valid key/nonce");
    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ct);
    out
}

fn aes_open(key: &[u8; 32], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    use aes_gcm::{
        aead::{Aead, KeyInit},
        Aes256Gcm, Nonce,
    };
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::MalformedEnvelope("ciphertext too short".into()));
    }
    let (nonce_bytes, ct) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).expect("32-byte key");
    let pt = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ct)
        .map_err(|_| CryptoError::NotAddressedToUs)?;
    Ok(Zeroizing::new(pt))
}

impl CryptoMsg for Secp256k1CryptoMsg {
    fn build_envelope(&self, req: BuildEnvelopeRequest) -> Result<BuiltEnvelope, CryptoError> {
        if req.recipient_pubkeys.is_empty() {
            return Err(CryptoError::NoRecipients);
        }
        let secp = Secp256k1::new();
        let sender_sk = secret_key_from_hex(&req.sender_private_key_hex)?;

        // Fresh per-message symmetric key, sealed with AES-GCM; the key
        // itself is then wrapped per-recipient via ECDH.
        let mut message_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut message_key);
        let encrypted_body_bytes = aes_seal(&message_key, req.message.as_bytes());

        // One ephemeral keypair per envelope; its public half travels in
        // the clear so every recipient can redo the ECDH.
        let ephemeral_sk = SecretKey::new(&mut rand::rngs::OsRng);
        let ephemeral_pk = PublicKey::from_secret_key(&secp, &ephemeral_sk);
        let ephemeral_pubkey_bytes = ephemeral_pk.serialize().to_vec();

        let mut recipients = Vec::with_capacity(req.recipient_pubkeys.len());
        for pk_hex in &req.recipient_pubkeys {
            let recipient_pk = pubkey_from_hex(pk_hex)?;
            let shared = ecdh::SharedSecret::new(&recipient_pk, &ephemeral_sk);
            let wrap_key = derive_aes_key(&shared);
            let wrapped_key = aes_seal(&wrap_key, &message_key);
            let recipient_hash = utils::hash160(&recipient_pk.serialize());
            recipients.push(envelope::RecipientWire {
                recipient_hash,
                wrapped_key,
            });
        }

        let unsigned = envelope::UnsignedEnvelope {
            ephemeral_pubkey_bytes,
            encrypted_body_bytes,
            recipients,
        };
        let signing_bytes = unsigned.canonical_bytes();
        let message_hash = {
            use sha2::{Digest, Sha256};
            Sha256::digest(&signing_bytes).to_vec()
        };
        let msg = secp256k1::Message::from_digest_slice(&message_hash)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let signature = secp.sign_ecdsa(&msg, &sender_sk).serialize_der().to_vec();

        let full = unsigned.into_signed(signature);
        Ok(BuiltEnvelope {
            hex: utils::bytes_to_hex(&full.to_bytes()),
            message_hash: utils::bytes_to_hex(&message_hash),
        })
    }

    fn open_envelope(
        &self,
        encrypted_payload_hex: &str,
        recipient_private_key_hex: &str,
    ) -> Result<String, CryptoError> {
        let bytes = utils::hex_to_bytes(encrypted_payload_hex)?;
        let parsed = envelope::SignedEnvelope::parse(&bytes)?;
        let recipient_sk = secret_key_from_hex(recipient_private_key_hex)?;
        let secp = Secp256k1::new();
        let recipient_pk = PublicKey::from_secret_key(&secp, &recipient_sk);
        let own_hash = utils::hash160(&recipient_pk.serialize());

        let ephemeral_pk = PublicKey::from_slice(&parsed.ephemeral_pubkey_bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let shared = ecdh::SharedSecret::new(&ephemeral_pk, &recipient_sk);
        let wrap_key = derive_aes_key(&shared);

        let entry = parsed
            .recipients
            .iter()
            .find(|r| r.recipient_hash == own_hash)
            .ok_or(CryptoError::NotAddressedToUs)?;
        let message_key = aes_open(&wrap_key, &entry.wrapped_key)?;
        let message_key: [u8; 32] = message_key
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::MalformedEnvelope("wrapped key has wrong length".into()))?;
        let plaintext = aes_open(&message_key, &parsed.encrypted_body_bytes)?;
        String::from_utf8(plaintext.to_vec())
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }

    fn wrap_for_pool(
        &self,
        payload_hex: &str,
        pool_pubkey_hex: &str,
        sender_address: &str,
    ) -> Result<String, CryptoError> {
        let secp = Secp256k1::new();
        let pool_pk = pubkey_from_hex(pool_pubkey_hex)?;
        let ephemeral_sk = SecretKey::new(&mut rand::rngs::OsRng);
        let ephemeral_pk = PublicKey::from_secret_key(&secp, &ephemeral_sk);
        let shared = ecdh::SharedSecret::new(&pool_pk, &ephemeral_sk);
        let key = derive_aes_key(&shared);

        let envelope_bytes = utils::hex_to_bytes(payload_hex)?;
        let record = PoolRecord {
            sender_address: sender_address.to_string(),
            payload: envelope_bytes,
        };
        let plaintext =
            serde_json::to_vec(&record).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        let sealed = aes_seal(&key, &plaintext);

        let mut out = Vec::with_capacity(33 + sealed.len());
        out.extend_from_slice(&ephemeral_pk.serialize());
        out.extend_from_slice(&sealed);
        Ok(utils::bytes_to_hex(&out))
    }

    fn unwrap_from_pool(
        &self,
        encrypted_hex: &str,
        recipient_private_key_hex: &str,
    ) -> Result<String, CryptoError> {
        let bytes = utils::hex_to_bytes(encrypted_hex)?;
        if bytes.len() < 33 {
            return Err(CryptoError::MalformedEnvelope("pool envelope too short".into()));
        }
        let (ephemeral_pk_bytes, sealed) = bytes.split_at(33);
        let ephemeral_pk = PublicKey::from_slice(ephemeral_pk_bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let recipient_sk = secret_key_from_hex(recipient_private_key_hex)?;
        let shared = ecdh::SharedSecret::new(&ephemeral_pk, &recipient_sk);
        let key = derive_aes_key(&shared);
        let plaintext = aes_open(&key, sealed)?;
        let record: PoolRecord = serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        serde_json::to_string(&vec![serde_json::json!({
            "payload_hex": utils::bytes_to_hex(&record.payload),
            "sender_address": record.sender_address,
        })])
        .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }
}

#[derive(Serialize, Deserialize)]
struct PoolRecord {
    sender_address: String,
    #[serde(with = "hex_bytes")]
    payload: Vec<u8>,
}
