use std::collections::HashSet;

use crate::model::{Address, StoredMessage};

/// In-memory message log, sorted by `(timestamp, hash)` and deduplicated
/// on `(hash, signature)`. Also tracks which recipient a private message
/// we sent was addressed to, so a later incoming reply can be matched
/// back to a peer without re-deriving it from the recipient hash table.
#[derive(Default)]
pub struct MessageStore {
    messages: Vec<StoredMessage>,
    seen: HashSet<String>,
    outgoing_private: std::collections::HashMap<String, Address>,
}

impl MessageStore {
    pub fn new() -> Self {
        MessageStore::default()
    }

    /// Insert `message`, returning `true` if it was new. Maintains sort
    /// order by `(timestamp, hash)` on every insert.
    pub fn add(&mut self, message: StoredMessage) -> bool {
        let key = message.dedup_key();
        if !self.seen.insert(key) {
            return false;
        }
        let pos = self
            .messages
            .partition_point(|m| (m.timestamp, &m.hash) <= (message.timestamp, &message.hash));
        self.messages.insert(pos, message);
        true
    }

    pub fn last_timestamp(&self) -> Option<u64> {
        self.messages.last().map(|m| m.timestamp)
    }

    /// Record that `message_hash` was a private message we sent to `peer`,
    /// so classification of a later inbound reply can resolve the peer
    /// without consulting the recipient hash table.
    pub fn register_outgoing_private(&mut self, message_hash: String, peer: Address) {
        self.outgoing_private.insert(message_hash, peer);
    }

    pub fn lookup_outgoing_private(&self, message_hash: &str) -> Option<&Address> {
        self.outgoing_private.get(message_hash)
    }

    /// Wipe all state. Used on `Blocked -> Running` recovery, where the
    /// supervisor performs a full resync rather than trusting a partial
    /// history accumulated before the outage.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.seen.clear();
        self.outgoing_private.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredMessage> {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageKind;

    fn msg(hash: &str, ts: u64) -> StoredMessage {
        StoredMessage {
            hash: hash.to_string(),
            signature: vec![1, 2, 3],
            sender: Address::from("addr"),
            timestamp: ts,
            plaintext: "hi".to_string(),
            kind: MessageKind::Group,
            peer: None,
        }
    }

    #[test]
    fn duplicate_hash_and_signature_is_rejected() {
        let mut store = MessageStore::new();
        assert!(store.add(msg("h1", 1)));
        assert!(!store.add(msg("h1", 1)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn same_hash_different_signature_is_kept() {
        let mut store = MessageStore::new();
        let mut second = msg("h1", 1);
        second.signature = vec![9, 9, 9];
        assert!(store.add(msg("h1", 1)));
        assert!(store.add(second));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn messages_are_kept_sorted_by_timestamp_then_hash() {
        let mut store = MessageStore::new();
        store.add(msg("b", 5));
        store.add(msg("a", 5));
        store.add(msg("z", 1));
        let order: Vec<&str> = store.iter().map(|m| m.hash.as_str()).collect();
        assert_eq!(order, vec!["z", "a", "b"]);
    }

    #[test]
    fn clear_resets_everything() {
        let mut store = MessageStore::new();
        store.add(msg("h1", 1));
        store.register_outgoing_private("h1".to_string(), Address::from("peer"));
        store.clear();
        assert!(store.is_empty());
        assert!(store.lookup_outgoing_private("h1").is_none());
    }
}
