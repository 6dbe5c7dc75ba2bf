use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use messenger_crypto::utils::hash160;

use crate::cache::Cache;
use crate::error::RpcError;
use crate::model::{Address, Pubkey, RecipientEntry};
use crate::rpc::RpcApi;

const DIRECTORY_TTL: Duration = Duration::from_secs(60);

/// The set of token-gated recipients, refreshed from `list_depin_addresses`
/// with TTL caching and single-flight refresh. `hash_map()` indexes every
/// entry under both the forward and byte-reversed hex form of its
/// `hash160(pubkey)`, since the wire format's recipient hashes have been
/// observed in both orders depending on producer.
pub struct RecipientDirectory {
    rpc: Arc<dyn RpcApi>,
    token: String,
    entries: Cache<Vec<RecipientEntry>>,
}

impl RecipientDirectory {
    pub fn new(rpc: Arc<dyn RpcApi>, token: String) -> Self {
        RecipientDirectory {
            rpc,
            token,
            entries: Cache::new(DIRECTORY_TTL),
        }
    }

    /// Current entries, refreshing from chain if the TTL has lapsed or
    /// `force` is set.
    pub async fn refresh(&self, force: bool) -> Result<Vec<RecipientEntry>, RpcError> {
        if force {
            self.entries.invalidate().await;
        }
        self.entries.get_or_refresh(|| self.fetch()).await
    }

    /// A single `list_depin_addresses` call returns every token-gated
    /// address together with its revealed pubkey, avoiding the N+1
    /// `list_addresses_by_asset` + per-holder `get_pubkey` round trips.
    async fn fetch(&self) -> Result<Vec<RecipientEntry>, RpcError> {
        tracing::debug!(token = %self.token, "refreshing recipient directory");
        let entries = self.rpc.list_depin_addresses().await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                entry.pubkey.map(|pubkey_hex| RecipientEntry {
                    address: Address::from(entry.address),
                    pubkey: Pubkey::from_hex(&pubkey_hex),
                })
            })
            .collect())
    }

    /// `recipient_hash -> address` table, each entry reachable by both the
    /// natural and byte-reversed hex encoding of its hash160. Used to
    /// resolve a private message's true peer from its envelope's recipient
    /// table when the wire `sender` field alone is insufficient.
    pub async fn hash_map(&self) -> Result<HashMap<String, Address>, RpcError> {
        let entries = self.refresh(false).await?;
        let mut map = HashMap::with_capacity(entries.len() * 2);
        for entry in &entries {
            let Ok(pk_bytes) = entry.pubkey.to_bytes() else {
                continue;
            };
            let hash = hash160(&pk_bytes);
            let forward = hex::encode(hash);
            let mut reversed_bytes = hash;
            reversed_bytes.reverse();
            let reversed = hex::encode(reversed_bytes);
            map.insert(forward, entry.address.clone());
            map.insert(reversed, entry.address.clone());
        }
        Ok(map)
    }

    pub async fn pubkey_for(&self, address: &Address) -> Result<Option<Pubkey>, RpcError> {
        let entries = self.refresh(false).await?;
        Ok(entries
            .iter()
            .find(|e| &e.address == address)
            .map(|e| e.pubkey.clone()))
    }

    /// Full current pubkey set, used for group-message broadcast
    /// recipient resolution. Forces a refresh if the directory has never
    /// been populated.
    pub async fn pubkeys(&self) -> Result<Vec<Pubkey>, RpcError> {
        let force = self.entries.peek().await.is_none();
        let entries = self.refresh(force).await?;
        Ok(entries.into_iter().map(|e| e.pubkey).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{BlockchainInfo, MsgPoolInfo, WireMessage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRpc {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RpcApi for FakeRpc {
        fn is_connected(&self) -> bool {
            true
        }
        async fn reconnect(&self) -> bool {
            true
        }
        async fn blockchain_info(&self) -> Result<BlockchainInfo, RpcError> {
            unimplemented!()
        }
        async fn msg_pool_info(&self) -> Result<MsgPoolInfo, RpcError> {
            unimplemented!()
        }
        async fn msg_receive(
            &self,
            _token: &str,
            _address: &str,
            _since_ts: Option<u64>,
        ) -> Result<Vec<WireMessage>, RpcError> {
            unimplemented!()
        }
        async fn msg_submit(&self, _envelope_hex: &str) -> Result<String, RpcError> {
            unimplemented!()
        }
        async fn list_depin_addresses(&self) -> Result<Vec<crate::rpc::DepinAddressEntry>, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![crate::rpc::DepinAddressEntry {
                address: "addr1".to_string(),
                pubkey: Some(format!("{:0>66}", "addr11")),
            }])
        }
        async fn list_addresses_by_asset(&self, _token: &str) -> Result<Vec<String>, RpcError> {
            unimplemented!()
        }
        async fn get_pubkey(&self, _address: &str) -> Result<Option<String>, RpcError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn hash_map_contains_forward_and_reverse_entries() {
        let rpc: Arc<dyn RpcApi> = Arc::new(FakeRpc {
            calls: AtomicUsize::new(0),
        });
        let directory = RecipientDirectory::new(rpc, "TOK".to_string());
        let map = directory.hash_map().await.unwrap();
        assert_eq!(map.len(), 2);
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        let mut forward = hex::decode(keys[0]).unwrap();
        forward.reverse();
        assert_eq!(hex::encode(forward), *keys[1]);
        assert!(map.values().all(|addr| addr == &Address::from("addr1")));
    }

    #[tokio::test]
    async fn refresh_is_cached_within_ttl() {
        let rpc = Arc::new(FakeRpc {
            calls: AtomicUsize::new(0),
        });
        let directory = RecipientDirectory::new(rpc.clone(), "TOK".to_string());
        directory.refresh(false).await.unwrap();
        directory.refresh(false).await.unwrap();
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_uses_single_list_depin_addresses_call() {
        let rpc = Arc::new(FakeRpc {
            calls: AtomicUsize::new(0),
        });
        let directory = RecipientDirectory::new(rpc.clone(), "TOK".to_string());
        let entries = directory.refresh(false).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 1);
    }
}
