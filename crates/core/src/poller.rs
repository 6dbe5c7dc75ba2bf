use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::directory::RecipientDirectory;
use crate::envelope::EnvelopeCodec;
use crate::error::DepinError;
use crate::events::{Event, UiAdapter};
use crate::model::{Address, MessageKind, StoredMessage};
use crate::rpc::RpcApi;
use crate::store::MessageStore;

/// Fetches new messages since the store's last known timestamp, decrypts
/// and classifies each one, and appends it to the shared `MessageStore`.
/// Non-reentrant: a poll tick that arrives while a previous one is still
/// running is dropped rather than queued, since the next tick will cover
/// the same window anyway.
pub struct Poller {
    rpc: Arc<dyn RpcApi>,
    directory: Arc<RecipientDirectory>,
    codec: Arc<EnvelopeCodec>,
    store: Arc<Mutex<MessageStore>>,
    ui: Arc<dyn UiAdapter>,
    self_address: Address,
    token: String,
    running: AtomicBool,
    was_down: AtomicBool,
    total: AtomicU64,
}

impl Poller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rpc: Arc<dyn RpcApi>,
        directory: Arc<RecipientDirectory>,
        codec: Arc<EnvelopeCodec>,
        store: Arc<Mutex<MessageStore>>,
        ui: Arc<dyn UiAdapter>,
        self_address: Address,
        token: String,
    ) -> Self {
        Poller {
            rpc,
            directory,
            codec,
            store,
            ui,
            self_address,
            token,
            running: AtomicBool::new(false),
            was_down: AtomicBool::new(false),
            total: AtomicU64::new(0),
        }
    }

    /// Run one poll tick. Returns `Ok(0)` without doing any work if a
    /// previous tick is still in flight. `full_sync` forces a fetch of
    /// the entire history (used right after a `Blocked -> Running`
    /// recovery) rather than an incremental `since_ts` fetch.
    pub async fn poll_once(
        &self,
        our_private_key_hex: &str,
        full_sync: bool,
    ) -> Result<usize, DepinError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(0);
        }
        let result = self.poll_inner(our_private_key_hex, full_sync).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn poll_inner(
        &self,
        our_private_key_hex: &str,
        full_sync: bool,
    ) -> Result<usize, DepinError> {
        if !self.rpc.is_connected() {
            self.was_down.store(true, Ordering::SeqCst);
            self.ui
                .handle(Event::PollError {
                    message: "rpc unavailable".to_string(),
                })
                .await;
            return Ok(0);
        }
        if self.was_down.swap(false, Ordering::SeqCst) {
            self.ui.handle(Event::Reconnected).await;
        }

        let since_ts = if full_sync {
            None
        } else {
            self.store.lock().await.last_timestamp()
        };

        tracing::debug!(?since_ts, full_sync, "polling for new messages");

        let wire_messages = self
            .rpc
            .msg_receive(&self.token, self.self_address.0.as_str(), since_ts)
            .await?;
        tracing::debug!(count = wire_messages.len(), "fetched messages");

        let mut new_count = 0usize;
        for wire in wire_messages {
            let Ok(envelope_hex) = self
                .unwrap_envelope_hex(&wire.payload_hex, our_private_key_hex)
                .await
            else {
                continue;
            };
            let Ok(plaintext) = self.codec.open(&envelope_hex, our_private_key_hex) else {
                continue;
            };
            let kind = MessageKind::from_wire_str(wire.message_type.as_deref());
            let peer = self
                .resolve_peer(&wire.hash, &wire.sender, kind, &envelope_hex)
                .await;

            let message = StoredMessage {
                hash: wire.hash,
                signature: wire.signature,
                sender: Address::from(wire.sender),
                timestamp: wire.timestamp,
                plaintext,
                kind,
                peer,
            };

            let mut store = self.store.lock().await;
            let is_new = store.add(message.clone());
            drop(store);
            if is_new {
                new_count += 1;
                self.ui.handle(Event::MessageReceived(message)).await;
            }
        }

        let pool_info = self
            .rpc
            .msg_pool_info()
            .await
            .ok()
            .and_then(|info| info.active_pool_key().map(|k| k.to_string()));
        let total = self.total.fetch_add(new_count as u64, Ordering::SeqCst) + new_count as u64;
        self.ui
            .handle(Event::PollComplete {
                date: chrono::Utc::now().to_rfc3339(),
                new_count,
                total,
                pool_info,
            })
            .await;

        Ok(new_count)
    }

    /// A message's `encrypted_payload_hex` is either a raw envelope hex,
    /// or, once a privacy-layer pool is active, a `{"encrypted": hex}`
    /// pool-wrapped payload that must be unwrapped first.
    async fn unwrap_envelope_hex(
        &self,
        payload_hex: &str,
        our_private_key_hex: &str,
    ) -> Result<String, DepinError> {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(payload_hex) {
            if let Some(encrypted) = value.get("encrypted").and_then(|v| v.as_str()) {
                return self
                    .codec
                    .unwrap_from_pool(encrypted, our_private_key_hex)
                    .map_err(Into::into);
            }
        }
        Ok(payload_hex.to_string())
    }

    async fn resolve_peer(
        &self,
        message_hash: &str,
        sender: &str,
        kind: MessageKind,
        envelope_hex: &str,
    ) -> Option<Address> {
        if kind == MessageKind::Group {
            return None;
        }
        let sender_addr = Address::from(sender);
        if sender_addr != self.self_address {
            return Some(sender_addr);
        }
        // We were the sender: this is our own outbound private message
        // echoed back; look up who we actually addressed it to.
        let store = self.store.lock().await;
        if let Some(peer) = store.lookup_outgoing_private(message_hash).cloned() {
            return Some(peer);
        }
        drop(store);
        // Fall back to scanning the envelope's recipient table: whichever
        // recipient hash isn't us is the peer we sent this to.
        self.resolve_peer_via_recipient_hash(envelope_hex).await
    }

    async fn resolve_peer_via_recipient_hash(&self, envelope_hex: &str) -> Option<Address> {
        let bytes = hex::decode(envelope_hex).ok()?;
        let hashes = crate::envelope::extract_recipient_hashes(&bytes).ok()?;
        let hash_map = self.directory.hash_map().await.ok()?;
        hashes
            .into_iter()
            .map(hex::encode)
            .find_map(|h| hash_map.get(&h).cloned())
            .filter(|addr| addr != &self.self_address)
    }
}
