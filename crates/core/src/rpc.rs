use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Deserialize;
use serde_json::Value;

use crate::error::RpcError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Deserialize)]
pub struct BlockchainInfo {
    pub height: u64,
    #[serde(default)]
    pub chain: String,
}

/// The node's privacy-layer pool advertisement. `depinpoolpkey` is only a
/// live pool key when present AND not the sentinel `"0"` some nodes send
/// to mean "no pool configured".
#[derive(Clone, Debug, Deserialize)]
pub struct MsgPoolInfo {
    #[serde(default, rename = "depinpoolpkey")]
    pub pool_key: Option<String>,
}

impl MsgPoolInfo {
    pub fn active_pool_key(&self) -> Option<&str> {
        self.pool_key.as_deref().filter(|k| *k != "0")
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct WireMessage {
    pub hash: String,
    #[serde(rename = "signature_hex", with = "hex_signature")]
    pub signature: Vec<u8>,
    pub sender: String,
    pub timestamp: u64,
    #[serde(rename = "encrypted_payload_hex")]
    pub payload_hex: String,
    #[serde(default, rename = "message_type")]
    pub message_type: Option<String>,
}

mod hex_signature {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DepinAddressEntry {
    pub address: String,
    #[serde(default)]
    pub pubkey: Option<String>,
}

/// Response shape of `get_pubkey`: the pubkey is only meaningful once
/// `revealed` is non-zero, regardless of whether the field is present.
#[derive(Clone, Debug, Deserialize)]
struct PubkeyResponse {
    #[serde(default)]
    pubkey: Option<String>,
    #[serde(default)]
    revealed: u8,
}

/// The subset of the node's JSON-RPC surface this client depends on.
/// Kept as a trait so tests can swap in an in-memory fake without any
/// network I/O.
#[async_trait]
pub trait RpcApi: Send + Sync {
    /// Cached reachability flag, updated by every successful/failed call
    /// and by `reconnect`. Never makes a network call itself.
    fn is_connected(&self) -> bool;
    /// Probe the node and update the cached reachability flag.
    async fn reconnect(&self) -> bool;
    async fn blockchain_info(&self) -> Result<BlockchainInfo, RpcError>;
    async fn msg_pool_info(&self) -> Result<MsgPoolInfo, RpcError>;
    async fn msg_receive(
        &self,
        token: &str,
        address: &str,
        since_ts: Option<u64>,
    ) -> Result<Vec<WireMessage>, RpcError>;
    async fn msg_submit(&self, envelope_hex: &str) -> Result<String, RpcError>;
    async fn list_depin_addresses(&self) -> Result<Vec<DepinAddressEntry>, RpcError>;
    async fn list_addresses_by_asset(&self, token: &str) -> Result<Vec<String>, RpcError>;
    async fn get_pubkey(&self, address: &str) -> Result<Option<String>, RpcError>;
}

/// `jsonrpsee`-backed client against the node's HTTP JSON-RPC endpoint.
/// Tracks a `connected` flag updated by every call and by explicit
/// `reconnect` probes.
pub struct RpcClient {
    inner: HttpClient,
    connected: AtomicBool,
}

impl RpcClient {
    pub fn new(
        endpoint: url::Url,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, RpcError> {
        let mut builder = HttpClientBuilder::default().request_timeout(DEFAULT_TIMEOUT);
        if let (Some(user), Some(pass)) = (username, password) {
            let auth = format!("Basic {}", BASE64.encode(format!("{user}:{pass}")));
            let mut headers = jsonrpsee::http_client::HeaderMap::new();
            let value = jsonrpsee::http_client::HeaderValue::from_str(&auth)
                .map_err(|e| RpcError::Transport(e.to_string()))?;
            headers.insert(
                jsonrpsee::http_client::HeaderName::from_static("authorization"),
                value,
            );
            builder = builder.set_headers(headers);
        }
        let inner = builder
            .build(endpoint.as_str())
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(RpcClient {
            inner,
            connected: AtomicBool::new(false),
        })
    }

    /// Probe reachability with `blockchain_info`. When `silent` is true,
    /// failures are not logged at warn level (used for pre-unlock health
    /// checks where a cold start is expected).
    async fn test_connection(&self, silent: bool) -> bool {
        match self.request_raw("blockchain_info", rpc_params![]).await {
            Ok(_) => {
                self.connected.store(true, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                if !silent {
                    tracing::warn!(error = %e, "rpc connection probe failed");
                }
                false
            }
        }
    }

    async fn request_raw(
        &self,
        method: &str,
        params: jsonrpsee::core::params::ArrayParams,
    ) -> Result<Value, RpcError> {
        let result: Value = self
            .inner
            .request(method, params)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        self.connected.store(true, Ordering::Relaxed);
        Ok(result)
    }
}

#[async_trait]
impl RpcApi for RpcClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn reconnect(&self) -> bool {
        self.test_connection(false).await
    }

    async fn blockchain_info(&self) -> Result<BlockchainInfo, RpcError> {
        let value = self.request_raw("blockchain_info", rpc_params![]).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn msg_pool_info(&self) -> Result<MsgPoolInfo, RpcError> {
        let value = self.request_raw("msg_pool_info", rpc_params![]).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn msg_receive(
        &self,
        token: &str,
        address: &str,
        since_ts: Option<u64>,
    ) -> Result<Vec<WireMessage>, RpcError> {
        let value = match since_ts {
            Some(ts) => {
                self.request_raw("msg_receive", rpc_params![token, address, ts])
                    .await?
            }
            None => {
                self.request_raw("msg_receive", rpc_params![token, address])
                    .await?
            }
        };
        serde_json::from_value(value).map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn msg_submit(&self, envelope_hex: &str) -> Result<String, RpcError> {
        let value = self
            .request_raw("msg_submit", rpc_params![envelope_hex])
            .await?;
        serde_json::from_value(value).map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn list_depin_addresses(&self) -> Result<Vec<DepinAddressEntry>, RpcError> {
        let value = self
            .request_raw("list_depin_addresses", rpc_params![])
            .await?;
        serde_json::from_value(value).map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn list_addresses_by_asset(&self, token: &str) -> Result<Vec<String>, RpcError> {
        let value = self
            .request_raw("list_addresses_by_asset", rpc_params![token])
            .await?;
        serde_json::from_value(value).map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn get_pubkey(&self, address: &str) -> Result<Option<String>, RpcError> {
        let value = self.request_raw("get_pubkey", rpc_params![address]).await?;
        let parsed: PubkeyResponse =
            serde_json::from_value(value).map_err(|e| RpcError::Transport(e.to_string()))?;
        if parsed.revealed != 0 {
            Ok(parsed.pubkey)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_pool_key_ignores_sentinel_zero() {
        let present = MsgPoolInfo {
            pool_key: Some("02aabb".to_string()),
        };
        assert_eq!(present.active_pool_key(), Some("02aabb"));

        let sentinel = MsgPoolInfo {
            pool_key: Some("0".to_string()),
        };
        assert_eq!(sentinel.active_pool_key(), None);

        let absent = MsgPoolInfo { pool_key: None };
        assert_eq!(absent.active_pool_key(), None);
    }
}
