use secp256k1::{PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::WalletError;
use crate::model::{Address, Pubkey};

const WIF_MAINNET_VERSION: u8 = 0x80;

/// A decoded WIF signing key, held zeroized until it is handed to the
/// crypto backend for signing or ECDH.
pub struct SigningKey {
    pub secret_key: SecretKey,
    pub compressed: bool,
}

impl SigningKey {
    /// Decode a base58check WIF string per Bitcoin's encoding:
    /// `version(1) || secret(32) || [compression flag(1)] || checksum(4)`.
    pub fn from_wif(wif: &Zeroizing<String>) -> Result<Self, WalletError> {
        let payload = bs58::decode(wif.as_str())
            .into_vec()
            .map_err(|e| WalletError::InvalidWif(e.to_string()))?;
        if payload.len() != 37 && payload.len() != 38 {
            return Err(WalletError::InvalidWif("unexpected payload length".into()));
        }
        let (body, checksum) = payload.split_at(payload.len() - 4);
        let expected = double_sha256(body);
        if &expected[..4] != checksum {
            return Err(WalletError::InvalidWif("checksum mismatch".into()));
        }
        if body[0] != WIF_MAINNET_VERSION {
            return Err(WalletError::InvalidWif("unexpected version byte".into()));
        }
        let compressed = body.len() == 34;
        if compressed && body[33] != 0x01 {
            return Err(WalletError::InvalidWif("bad compression flag".into()));
        }
        let secret_key = SecretKey::from_slice(&body[1..33])
            .map_err(|e| WalletError::InvalidWif(e.to_string()))?;
        Ok(SigningKey {
            secret_key,
            compressed,
        })
    }

    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.secret_key.secret_bytes()))
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::signing_only();
        PublicKey::from_secret_key(&secp, &self.secret_key)
    }

    pub fn pubkey(&self) -> Pubkey {
        let pk = self.public_key();
        let bytes = if self.compressed {
            pk.serialize().to_vec()
        } else {
            pk.serialize_uncompressed().to_vec()
        };
        Pubkey::from_bytes(&bytes)
    }

    /// The self address derived from the public key, using the same
    /// `hash160` + base58check scheme as on-chain wallet addresses.
    pub fn address(&self) -> Address {
        let pk = self.public_key();
        let pk_bytes = if self.compressed {
            pk.serialize().to_vec()
        } else {
            pk.serialize_uncompressed().to_vec()
        };
        let hash = messenger_crypto::utils::hash160(&pk_bytes);
        let mut payload = Vec::with_capacity(1 + 20 + 4);
        payload.push(0x00);
        payload.extend_from_slice(&hash);
        let checksum = double_sha256(&payload);
        payload.extend_from_slice(&checksum[..4]);
        Address(bs58::encode(payload).into_string())
    }
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_checksum() {
        let wif = Zeroizing::new(bs58::encode([0u8; 37]).into_string());
        assert!(SigningKey::from_wif(&wif).is_err());
    }

    #[test]
    fn round_trips_a_valid_compressed_wif() {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let mut body = vec![WIF_MAINNET_VERSION];
        body.extend_from_slice(&secret_key.secret_bytes());
        body.push(0x01);
        let checksum = double_sha256(&body);
        body.extend_from_slice(&checksum[..4]);
        let wif = Zeroizing::new(bs58::encode(body).into_string());

        let key = SigningKey::from_wif(&wif).unwrap();
        assert!(key.compressed);
        assert_eq!(key.secret_key, secret_key);
        let _ = secp;
    }

    #[test]
    fn address_is_stable_for_same_key() {
        let secret_key = SecretKey::from_slice(&[3u8; 32]).unwrap();
        let key_a = SigningKey {
            secret_key,
            compressed: true,
        };
        let key_b = SigningKey {
            secret_key,
            compressed: true,
        };
        assert_eq!(key_a.address(), key_b.address());
    }
}
