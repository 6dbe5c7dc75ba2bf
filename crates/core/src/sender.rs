use std::sync::Arc;

use messenger_crypto::EnvelopeKind;
use regex::Regex;
use tokio::sync::Mutex;

use crate::directory::RecipientDirectory;
use crate::envelope::EnvelopeCodec;
use crate::error::{DepinError, MessageError};
use crate::model::Address;
use crate::rpc::RpcApi;
use crate::store::MessageStore;

/// `@address rest of the message` — anything not matching this shape is
/// sent as a group broadcast instead.
fn private_message_pattern() -> Regex {
    Regex::new(r"^@(\S+)\s+(.+)$").expect("static regex is valid")
}

pub enum ParsedInput {
    Group(String),
    Private { address: Address, message: String },
}

/// Parse a line of chat input per `§4.7`: `@address message` addresses a
/// private message, anything else is a group broadcast.
pub fn parse_input(line: &str) -> Result<ParsedInput, MessageError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(MessageError::Generic("message must not be empty".into()));
    }
    if let Some(caps) = private_message_pattern().captures(trimmed) {
        let address = Address::from(caps[1].to_string());
        let message = caps[2].to_string();
        return Ok(ParsedInput::Private { address, message });
    }
    if trimmed.starts_with('@') {
        return Err(MessageError::InvalidPrivateFormat);
    }
    Ok(ParsedInput::Group(trimmed.to_string()))
}

/// Resolves recipients, builds and seals an envelope, and submits it to
/// the mempool — optionally re-wrapped through a privacy-layer pool key
/// when the node advertises one via `msg_pool_info`.
pub struct Sender {
    rpc: Arc<dyn RpcApi>,
    directory: Arc<RecipientDirectory>,
    codec: Arc<EnvelopeCodec>,
    store: Arc<Mutex<MessageStore>>,
    token: String,
    self_address: Address,
    self_pubkey_hex: String,
    self_private_key_hex: String,
}

impl Sender {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rpc: Arc<dyn RpcApi>,
        directory: Arc<RecipientDirectory>,
        codec: Arc<EnvelopeCodec>,
        store: Arc<Mutex<MessageStore>>,
        token: String,
        self_address: Address,
        self_pubkey_hex: String,
        self_private_key_hex: String,
    ) -> Self {
        Sender {
            rpc,
            directory,
            codec,
            store,
            token,
            self_address,
            self_pubkey_hex,
            self_private_key_hex,
        }
    }

    pub async fn send_line(&self, line: &str, timestamp: u64) -> Result<String, DepinError> {
        match parse_input(line)? {
            ParsedInput::Group(message) => self.send_group(&message, timestamp).await,
            ParsedInput::Private { address, message } => {
                self.send_private(&address, &message, timestamp).await
            }
        }
    }

    /// Confirm the node is reachable before doing any work, attempting one
    /// `reconnect` probe if the cached flag says otherwise.
    async fn ensure_connected(&self) -> Result<(), DepinError> {
        if self.rpc.is_connected() || self.rpc.reconnect().await {
            Ok(())
        } else {
            Err(MessageError::Generic("rpc unreachable, cannot send".into()).into())
        }
    }

    async fn send_group(&self, message: &str, timestamp: u64) -> Result<String, DepinError> {
        self.ensure_connected().await?;
        let recipients = self.directory.pubkeys().await?;
        if recipients.is_empty() {
            return Err(MessageError::NoRecipients.into());
        }
        let built = self.codec.build(
            &self.token,
            self.self_address.0.as_str(),
            &crate::model::Pubkey::from_hex(&self.self_pubkey_hex),
            &self.self_private_key_hex,
            timestamp,
            message,
            &recipients,
            EnvelopeKind::Group,
        )?;
        self.submit(&built.hex).await?;
        Ok(built.message_hash)
    }

    async fn send_private(
        &self,
        address: &Address,
        message: &str,
        timestamp: u64,
    ) -> Result<String, DepinError> {
        self.ensure_connected().await?;
        if address == &self.self_address {
            return Err(MessageError::Generic("cannot message yourself".into()).into());
        }
        let recipient_pubkey = self
            .directory
            .pubkey_for(address)
            .await?
            .ok_or_else(|| MessageError::RecipientPubkeyNotRevealed(address.clone()))?;

        let built = self.codec.build(
            &self.token,
            self.self_address.0.as_str(),
            &crate::model::Pubkey::from_hex(&self.self_pubkey_hex),
            &self.self_private_key_hex,
            timestamp,
            message,
            std::slice::from_ref(&recipient_pubkey),
            EnvelopeKind::Private,
        )?;
        self.submit(&built.hex).await?;

        let mut store = self.store.lock().await;
        store.register_outgoing_private(built.message_hash.clone(), address.clone());
        drop(store);
        Ok(built.message_hash)
    }

    /// Submit the sealed envelope, auto-detecting a `depinpoolpkey`
    /// privacy layer from `msg_pool_info` and re-wrapping through it when
    /// present.
    async fn submit(&self, envelope_hex: &str) -> Result<(), DepinError> {
        let pool_info = self.rpc.msg_pool_info().await?;
        let final_hex = match pool_info.active_pool_key() {
            Some(pool_key) => self
                .codec
                .wrap_for_pool(envelope_hex, pool_key, self.self_address.0.as_str())?,
            None => envelope_hex.to_string(),
        };
        self.rpc.msg_submit(&final_hex).await?;
        Ok(())
    }
}
