use std::sync::Arc;

use messenger_crypto::{BuildEnvelopeRequest, BuiltEnvelope, CryptoMsg, EnvelopeKind};

use crate::error::CryptoLibError;
use crate::model::Pubkey;

/// Thin wrapper around the external `CryptoMsg` collaborator: builds the
/// `BuildEnvelopeRequest` from core types and surfaces `CryptoLibError` on
/// backend failure, keeping `messenger_crypto::CryptoError` out of the
/// sender/poller call sites.
pub struct EnvelopeCodec {
    backend: Arc<dyn CryptoMsg>,
}

impl EnvelopeCodec {
    pub fn new(backend: Arc<dyn CryptoMsg>) -> Self {
        EnvelopeCodec { backend }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        token: &str,
        sender_address: &str,
        sender_pubkey: &Pubkey,
        sender_private_key_hex: &str,
        timestamp: u64,
        message: &str,
        recipient_pubkeys: &[Pubkey],
        kind: EnvelopeKind,
    ) -> Result<BuiltEnvelope, CryptoLibError> {
        let request = BuildEnvelopeRequest {
            token: token.to_string(),
            sender_address: sender_address.to_string(),
            sender_pubkey: sender_pubkey.as_hex().to_string(),
            sender_private_key_hex: sender_private_key_hex.to_string(),
            timestamp,
            message: message.to_string(),
            recipient_pubkeys: recipient_pubkeys
                .iter()
                .map(|pk| pk.as_hex().to_string())
                .collect(),
            kind,
        };
        self.backend
            .build_envelope(request)
            .map_err(|e| CryptoLibError(e.to_string()))
    }

    pub fn open(
        &self,
        envelope_hex: &str,
        our_private_key_hex: &str,
    ) -> Result<String, CryptoLibError> {
        self.backend
            .open_envelope(envelope_hex, our_private_key_hex)
            .map_err(|e| CryptoLibError(e.to_string()))
    }

    /// Re-wrap an already-sealed envelope for submission through a
    /// privacy-layer pool key, so the mempool only ever sees the pool's
    /// pubkey as the apparent recipient.
    pub fn wrap_for_pool(
        &self,
        envelope_hex: &str,
        pool_pubkey_hex: &str,
        sender_address: &str,
    ) -> Result<String, CryptoLibError> {
        self.backend
            .wrap_for_pool(envelope_hex, pool_pubkey_hex, sender_address)
            .map_err(|e| CryptoLibError(e.to_string()))
    }

    /// Undo `wrap_for_pool`: recover the original envelope hex from a
    /// pool-wrapped `{"encrypted": hex}` payload, to then be passed to
    /// `open`.
    pub fn unwrap_from_pool(
        &self,
        encrypted_hex: &str,
        recipient_private_key_hex: &str,
    ) -> Result<String, CryptoLibError> {
        self.backend
            .unwrap_from_pool(encrypted_hex, recipient_private_key_hex)
            .map_err(|e| CryptoLibError(e.to_string()))
    }
}

/// compact-size decoding used only to walk the recipient table of a raw
/// envelope without fully parsing it, independent of `messenger-crypto`'s
/// own internal wire module: this lets the poller classify a message by
/// scanning recipient hashes even before it knows who the sender meant to
/// reach.
#[derive(Debug, PartialEq, Eq)]
pub enum RecipientScanError {
    Truncated,
    CompactSizeTooLarge,
}

fn read_compact_size(bytes: &[u8], offset: &mut usize) -> Result<u64, RecipientScanError> {
    let first = *bytes.get(*offset).ok_or(RecipientScanError::Truncated)?;
    *offset += 1;
    match first {
        0..=252 => Ok(first as u64),
        253 => {
            let slice = bytes
                .get(*offset..*offset + 2)
                .ok_or(RecipientScanError::Truncated)?;
            *offset += 2;
            Ok(u16::from_le_bytes(slice.try_into().unwrap()) as u64)
        }
        254 => {
            let slice = bytes
                .get(*offset..*offset + 4)
                .ok_or(RecipientScanError::Truncated)?;
            *offset += 4;
            Ok(u32::from_le_bytes(slice.try_into().unwrap()) as u64)
        }
        255 => {
            let slice = bytes
                .get(*offset..*offset + 8)
                .ok_or(RecipientScanError::Truncated)?;
            *offset += 8;
            let value = u64::from_le_bytes(slice.try_into().unwrap());
            if value > (1u64 << 53) - 1 {
                return Err(RecipientScanError::CompactSizeTooLarge);
            }
            Ok(value)
        }
    }
}

fn read_vector_len(bytes: &[u8], offset: &mut usize) -> Result<usize, RecipientScanError> {
    let len = read_compact_size(bytes, offset)? as usize;
    if *offset + len > bytes.len() {
        return Err(RecipientScanError::Truncated);
    }
    Ok(len)
}

/// Parse `ephemeral_pubkey || encrypted_body || recipient_count ||
/// recipient_entries{20-byte hash, wrapped_key}` far enough to pull out
/// every 20-byte recipient hash, stopping before the trailing signature
/// (which this scan never needs to read).
pub fn extract_recipient_hashes(envelope_bytes: &[u8]) -> Result<Vec<[u8; 20]>, RecipientScanError> {
    let mut offset = 0usize;
    let ephemeral_len = read_vector_len(envelope_bytes, &mut offset)?;
    offset += ephemeral_len;
    let body_len = read_vector_len(envelope_bytes, &mut offset)?;
    offset += body_len;
    let count = read_compact_size(envelope_bytes, &mut offset)?;

    let mut hashes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let hash_slice = envelope_bytes
            .get(offset..offset + 20)
            .ok_or(RecipientScanError::Truncated)?;
        let mut hash = [0u8; 20];
        hash.copy_from_slice(hash_slice);
        offset += 20;
        hashes.push(hash);
        let wrapped_len = read_vector_len(envelope_bytes, &mut offset)?;
        offset += wrapped_len;
    }
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_compact_size(out: &mut Vec<u8>, value: u64) {
        if value < 253 {
            out.push(value as u8);
        } else if value <= u16::MAX as u64 {
            out.push(253);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        } else if value <= u32::MAX as u64 {
            out.push(254);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        } else {
            out.push(255);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn write_vector(out: &mut Vec<u8>, data: &[u8]) {
        write_compact_size(out, data.len() as u64);
        out.extend_from_slice(data);
    }

    #[test]
    fn extracts_two_recipient_hashes() {
        let mut bytes = Vec::new();
        write_vector(&mut bytes, &[1u8; 33]);
        write_vector(&mut bytes, &[2u8; 48]);
        write_compact_size(&mut bytes, 2);
        bytes.extend_from_slice(&[0xaa; 20]);
        write_vector(&mut bytes, &[9u8; 32]);
        bytes.extend_from_slice(&[0xbb; 20]);
        write_vector(&mut bytes, &[9u8; 32]);
        write_vector(&mut bytes, &[0u8; 70]); // trailing signature, unread

        let hashes = extract_recipient_hashes(&bytes).unwrap();
        assert_eq!(hashes, vec![[0xaa; 20], [0xbb; 20]]);
    }

    #[test]
    fn truncated_envelope_is_an_error() {
        let bytes = vec![5u8]; // claims a 5-byte vector but has none
        assert_eq!(
            extract_recipient_hashes(&bytes),
            Err(RecipientScanError::Truncated)
        );
    }

    #[test]
    fn rejects_compact_size_above_2_53_minus_1() {
        let mut bytes = vec![255u8];
        bytes.extend_from_slice(&(1u64 << 53).to_le_bytes());
        let mut offset = 0;
        assert_eq!(
            read_compact_size(&bytes, &mut offset),
            Err(RecipientScanError::CompactSizeTooLarge)
        );
    }

    #[test]
    fn empty_recipient_table_yields_no_hashes() {
        let mut bytes = Vec::new();
        write_vector(&mut bytes, &[1u8; 33]);
        write_vector(&mut bytes, &[2u8; 10]);
        write_compact_size(&mut bytes, 0);
        assert_eq!(extract_recipient_hashes(&bytes).unwrap(), Vec::<[u8; 20]>::new());
    }
}
