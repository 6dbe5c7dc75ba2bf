use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque wallet identifier on the underlying chain. Compared by
/// exact equality; never parsed or interpreted by the core.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub String);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

/// A compressed secp256k1-style public key, canonicalised as lowercase
/// hex the moment it is constructed so every later comparison and cache
/// lookup can simply compare strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pubkey(String);

impl Pubkey {
    pub fn from_hex(s: &str) -> Self {
        Pubkey(s.to_lowercase())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Pubkey(hex::encode(bytes))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(&self.0)
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A token holder discovered through `list_depin_addresses`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipientEntry {
    pub address: Address,
    pub pubkey: Pubkey,
}

/// `Group` messages have no single peer; `Private` messages always
/// resolve to a peer other than ourselves once classification succeeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Group,
    Private,
}

impl MessageKind {
    /// Normalise the wire's permissive `message_type` string: anything
    /// other than an exact, case-insensitive `"private"` is `Group`.
    pub fn from_wire_str(s: Option<&str>) -> Self {
        match s {
            Some(s) if s.eq_ignore_ascii_case("private") => MessageKind::Private,
            _ => MessageKind::Group,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    pub hash: String,
    pub signature: Vec<u8>,
    pub sender: Address,
    pub timestamp: u64,
    pub plaintext: String,
    pub kind: MessageKind,
    pub peer: Option<Address>,
}

impl StoredMessage {
    pub(crate) fn dedup_key(&self) -> String {
        format!("{}|{}", self.hash, hex::encode(&self.signature))
    }
}
