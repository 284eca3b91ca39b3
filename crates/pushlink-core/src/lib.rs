//! Pushlink Core Library
//!
//! This crate provides the core of pushlink, a desktop client for Pushbullet:
//! a realtime stream connection that stays up, incremental sync of the push
//! history, end-to-end decryption of mirrored notifications, and the rules for
//! turning all of that into desktop notifications.
//!
//! # Architecture
//!
//! - **Connection manager**: single task owning the stream, its heartbeat,
//!   keepalive and reconnection policy
//! - **Delta sync**: watermark plus a bounded cache, merged by `iden`
//! - **Local store**: JSON files, one per key, written atomically
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let handle = ConnectionManager::start(config, parts);
//!
//! // React to connection changes
//! while let Some(event) = handle.event_rx.recv().await { ... }
//! ```
//!
//! # Modules
//!
//! - `stream`: Connection manager and the stream protocol
//! - `sync`: Delta sync engine and push cache
//! - `notify`: Notification filtering and dispatch
//! - `crypto`: End-to-end decryption
//! - `api`: REST client
//! - `store`: Local key-value persistence
//! - `credentials`: Access token and encryption key storage
//! - `config`: Application configuration

pub mod api;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod models;
pub mod notify;
pub mod store;
pub mod stream;
pub mod sync;

pub use api::{PushApi, PushService};
pub use config::Config;
pub use credentials::{CredentialSource, CredentialStore, SharedCredential};
pub use crypto::PushCrypto;
pub use error::{ApiError, CryptoError, FailureKind, ManagerError, StoreError, TransportError};
pub use models::{Device, MirrorNotification, OutgoingPush, PushKind, PushRecord, SentPush, User};
pub use notify::{Desktop, Notification, NotificationDispatch};
pub use store::LocalStore;
pub use stream::{
    Collaborators, ConnectionHandle, ConnectionManager, ConnectionState, ManagerEvent,
    StatusReport,
};
pub use sync::{DeltaSync, FetchWindow};
