use thiserror::Error;

use crate::model::Address;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file could not be read: {0}")]
    Io(String),
    #[error("config file is not valid JSON: {0}")]
    Json(String),
    #[error("rpc_url does not parse as a URL: {0}")]
    InvalidRpcUrl(String),
    #[error("token must not be empty")]
    MissingToken,
    #[error("privateKey is missing; run the setup wizard")]
    MissingPrivateKey,
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret record is malformed; expected salt:iv:tag:ct")]
    MalformedSecret,
    #[error("incorrect password")]
    BadPassword,
    #[error("maximum unlock attempts exceeded")]
    MaxAttemptsExceeded,
    #[error("terminal I/O error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc error: {0}")]
    Transport(String),
}

impl RpcError {
    pub fn message(&self) -> &str {
        match self {
            RpcError::Transport(m) => m,
        }
    }
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid WIF signing key: {0}")]
    InvalidWif(String),
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("no recipients are available to send to")]
    NoRecipients,
    #[error("expected `@address message`")]
    InvalidPrivateFormat,
    #[error("{0}'s public key has not been revealed on-chain")]
    RecipientPubkeyNotRevealed(Address),
    #[error("{0}")]
    Generic(String),
}

#[derive(Debug, Error)]
#[error("the crypto backend could not be initialised: {0}")]
pub struct CryptoLibError(pub String);

/// Top-level composite error the Supervisor and CLI glue pattern-match
/// on; every component boundary's error composes into this via `?`.
#[derive(Debug, Error)]
pub enum DepinError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    CryptoLib(#[from] CryptoLibError),
    #[error(transparent)]
    Crypto(#[from] messenger_crypto::CryptoError),
}

impl DepinError {
    /// Message suitable for the one-line status bar / blocking panel;
    /// never includes internals that would leak which structural check
    /// of a password failed.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Whether this error should be treated by the Supervisor as an
    /// RPC-shaped failure (drives `Blocked`) vs. a surfaced status line.
    pub fn is_rpc_shaped(&self) -> bool {
        matches!(self, DepinError::Rpc(_))
    }
}
