//! Token-gated end-to-end encrypted messaging engine.
//!
//! This crate owns everything upstream of the wire-level crypto: config
//! loading, the password-derived secret store, the recipient directory,
//! the poller/sender pair, and the `Supervisor` state machine that gates
//! all of it on chain connectivity and token possession. The actual
//! envelope sealing lives in `messenger-crypto`, reached only through the
//! `CryptoMsg` trait via `EnvelopeCodec`.

pub mod cache;
pub mod config;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod events;
pub mod keys;
pub mod model;
pub mod poller;
pub mod rpc;
pub mod secret_store;
pub mod sender;
pub mod store;
pub mod supervisor;

pub use config::ConfigRecord;
pub use error::DepinError;
pub use events::{Event, NullUiAdapter, UiAdapter};
pub use keys::SigningKey;
pub use model::{Address, MessageKind, Pubkey, RecipientEntry, StoredMessage};
pub use rpc::{RpcApi, RpcClient};
pub use secret_store::SecretStore;
pub use sender::{ParsedInput, Sender};
pub use store::MessageStore;
pub use supervisor::{Supervisor, SupervisorState};
