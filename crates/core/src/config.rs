use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
const FORCED_NETWORK: &str = "xna";

/// The plaintext config document persisted at `config.json` in the
/// current working directory. The setup wizard is the only writer;
/// everything past startup treats this as read-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub rpc_url: String,
    #[serde(default)]
    pub rpc_username: Option<String>,
    #[serde(default)]
    pub rpc_password: Option<String>,
    pub token: String,
    /// The `SecretStore` record: `salt_hex:iv_hex:tag_hex:ct_hex`.
    #[serde(rename = "privateKey")]
    pub private_key: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(rename = "pollInterval", default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_network() -> String {
    FORCED_NETWORK.to_string()
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl ConfigRecord {
    /// Parse and normalise a config document already read from disk (or
    /// constructed by the wizard). Applies the clamps and forced fields
    /// from `§6`: `network` is always `"xna"`, `pollInterval` is clamped
    /// into `[MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS]`.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let mut record: ConfigRecord =
            serde_json::from_str(raw).map_err(|e| ConfigError::Json(e.to_string()))?;
        record.normalise()?;
        Ok(record)
    }

    pub fn load_from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json_str(&raw)
    }

    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let raw = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Json(e.to_string()))?;
        std::fs::write(path, raw).map_err(|e| ConfigError::Io(e.to_string()))
    }

    fn normalise(&mut self) -> Result<(), ConfigError> {
        Url::parse(&self.rpc_url).map_err(|e| ConfigError::InvalidRpcUrl(e.to_string()))?;
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.private_key.trim().is_empty() {
            return Err(ConfigError::MissingPrivateKey);
        }
        self.network = FORCED_NETWORK.to_string();
        self.poll_interval_ms = clamp_poll_interval(self.poll_interval_ms as i64);
        Ok(())
    }

    /// RPC base URL with `/rpc` appended if the configured URL has no
    /// path component of its own.
    pub fn rpc_endpoint(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.rpc_url).map_err(|e| ConfigError::InvalidRpcUrl(e.to_string()))?;
        if url.path().is_empty() || url.path() == "/" {
            url.set_path("/rpc");
        }
        Ok(url)
    }

    /// Parsed timezone offset in hours, `"UTC"` mapping to `0.0`.
    pub fn timezone_offset_hours(&self) -> f64 {
        if self.timezone.eq_ignore_ascii_case("utc") {
            0.0
        } else {
            self.timezone.parse().unwrap_or(0.0)
        }
    }
}

/// `pollInterval` of 0, negative, or `> 60000` is normalised into
/// `[1000, 60000]`.
pub fn clamp_poll_interval(ms: i64) -> u64 {
    if ms < MIN_POLL_INTERVAL_MS as i64 {
        MIN_POLL_INTERVAL_MS
    } else if ms > MAX_POLL_INTERVAL_MS as i64 {
        MAX_POLL_INTERVAL_MS
    } else {
        ms as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json(poll_interval: i64) -> String {
        format!(
            r#"{{"rpc_url":"http://127.0.0.1:8080","token":"TOK","privateKey":"a:b:c:d","pollInterval":{poll_interval}}}"#
        )
    }

    #[test]
    fn clamps_poll_interval_low_end() {
        let record = ConfigRecord::from_json_str(&sample_json(0)).unwrap();
        assert_eq!(record.poll_interval_ms, MIN_POLL_INTERVAL_MS);
        let record = ConfigRecord::from_json_str(&sample_json(-500)).unwrap();
        assert_eq!(record.poll_interval_ms, MIN_POLL_INTERVAL_MS);
    }

    #[test]
    fn clamps_poll_interval_high_end() {
        let record = ConfigRecord::from_json_str(&sample_json(999_999)).unwrap();
        assert_eq!(record.poll_interval_ms, MAX_POLL_INTERVAL_MS);
    }

    #[test]
    fn forces_network_to_xna() {
        let mut record = ConfigRecord::from_json_str(&sample_json(5_000)).unwrap();
        record.network = "not-xna".to_string();
        record.normalise().unwrap();
        assert_eq!(record.network, "xna");
    }

    #[test]
    fn rejects_bad_rpc_url() {
        let raw = r#"{"rpc_url":"not a url","token":"TOK","privateKey":"a:b:c:d"}"#;
        assert!(matches!(
            ConfigRecord::from_json_str(raw),
            Err(ConfigError::InvalidRpcUrl(_))
        ));
    }

    #[test]
    fn rejects_empty_token() {
        let raw = r#"{"rpc_url":"http://127.0.0.1:8080","token":"","privateKey":"a:b:c:d"}"#;
        assert!(matches!(
            ConfigRecord::from_json_str(raw),
            Err(ConfigError::MissingToken)
        ));
    }
}
