use serde::{Deserialize, Serialize};

use crate::wire::{read_compact_size, read_vector, write_compact_size, write_vector, WireError};
use crate::CryptoError;

/// Group vs. private is only relevant to how many recipients a caller
/// resolves before calling `build_envelope`; the envelope bytes
/// themselves don't encode it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    Group,
    Private,
}

#[derive(Clone, Debug)]
pub struct BuildEnvelopeRequest {
    pub token: String,
    pub sender_address: String,
    pub sender_pubkey: String,
    pub sender_private_key_hex: String,
    pub timestamp: u64,
    pub message: String,
    pub recipient_pubkeys: Vec<String>,
    pub kind: EnvelopeKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltEnvelope {
    pub hex: String,
    pub message_hash: String,
}

pub(crate) struct RecipientWire {
    pub recipient_hash: [u8; 20],
    pub wrapped_key: Vec<u8>,
}

pub(crate) struct UnsignedEnvelope {
    pub ephemeral_pubkey_bytes: Vec<u8>,
    pub encrypted_body_bytes: Vec<u8>,
    pub recipients: Vec<RecipientWire>,
}

impl UnsignedEnvelope {
    /// Bytes the signature is computed over: everything except the
    /// trailing signature field itself.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_vector(&mut out, &self.ephemeral_pubkey_bytes);
        write_vector(&mut out, &self.encrypted_body_bytes);
        write_compact_size(&mut out, self.recipients.len() as u64);
        for r in &self.recipients {
            out.extend_from_slice(&r.recipient_hash);
            write_vector(&mut out, &r.wrapped_key);
        }
        out
    }

    pub fn into_signed(self, signature: Vec<u8>) -> SignedEnvelope {
        SignedEnvelope {
            ephemeral_pubkey_bytes: self.ephemeral_pubkey_bytes,
            encrypted_body_bytes: self.encrypted_body_bytes,
            recipients: self.recipients,
            signature,
        }
    }
}

pub(crate) struct SignedEnvelope {
    pub ephemeral_pubkey_bytes: Vec<u8>,
    pub encrypted_body_bytes: Vec<u8>,
    pub recipients: Vec<RecipientWire>,
    pub signature: Vec<u8>,
}

impl SignedEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_vector(&mut out, &self.ephemeral_pubkey_bytes);
        write_vector(&mut out, &self.encrypted_body_bytes);
        write_compact_size(&mut out, self.recipients.len() as u64);
        for r in &self.recipients {
            out.extend_from_slice(&r.recipient_hash);
            write_vector(&mut out, &r.wrapped_key);
        }
        write_vector(&mut out, &self.signature);
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut offset = 0usize;
        let ephemeral_pubkey_bytes = read_vector(bytes, &mut offset)
            .map_err(wire_err)?
            .to_vec();
        let encrypted_body_bytes = read_vector(bytes, &mut offset)
            .map_err(wire_err)?
            .to_vec();
        let count = read_compact_size(bytes, &mut offset).map_err(wire_err)?;
        let mut recipients = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if offset + 20 > bytes.len() {
                return Err(CryptoError::MalformedEnvelope(
                    "truncated recipient hash".into(),
                ));
            }
            let mut recipient_hash = [0u8; 20];
            recipient_hash.copy_from_slice(&bytes[offset..offset + 20]);
            offset += 20;
            let wrapped_key = read_vector(bytes, &mut offset).map_err(wire_err)?.to_vec();
            recipients.push(RecipientWire {
                recipient_hash,
                wrapped_key,
            });
        }
        let signature = read_vector(bytes, &mut offset).map_err(wire_err)?.to_vec();
        Ok(Self {
            ephemeral_pubkey_bytes,
            encrypted_body_bytes,
            recipients,
            signature,
        })
    }
}

fn wire_err(e: WireError) -> CryptoError {
    CryptoError::MalformedEnvelope(e.to_string())
}
