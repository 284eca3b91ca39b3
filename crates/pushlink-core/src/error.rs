//! Error types
//!
//! Each concern gets its own typed error. Failures that reach the connection
//! manager are additionally tagged with a [`FailureKind`], which decides the
//! recovery path and the log level.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Recovery class of a failure observed by the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Open failed, abrupt close, or send failure. Recovered by reconnecting.
    Transport,
    /// No liveness frame within the heartbeat window. Recovered by reconnecting.
    Liveness,
    /// REST fetch or parse failure. Recovered on the next trigger.
    Sync,
    /// Bad key, corrupt blob, unsupported version. Payload is dropped.
    Crypto,
    /// Reconnection budget used up. Needs a manual retry or the slow sweep.
    Exhaustion,
}

impl FailureKind {
    /// Whether this failure is something the user can act on
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, FailureKind::Exhaustion)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Liveness => "liveness",
            FailureKind::Sync => "sync",
            FailureKind::Crypto => "crypto",
            FailureKind::Exhaustion => "exhaustion",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the realtime stream
#[derive(Error, Debug)]
pub enum TransportError {
    /// The stream could not be opened
    #[error("Failed to open stream: {0}")]
    Open(String),

    /// The server refused the credential during the handshake
    #[error("Stream rejected the access token (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Opening took longer than the connect timeout
    #[error("Timed out opening stream after {0:?}")]
    Timeout(Duration),

    /// Writing a frame failed
    #[error("Failed to send frame: {0}")]
    Send(String),

    /// The stream is already gone
    #[error("Stream is closed")]
    Closed,
}

impl TransportError {
    /// Whether the server rejected the credential rather than the network failing
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, TransportError::Unauthorized { .. })
    }
}

/// Errors from the REST API
#[derive(Error, Debug)]
pub enum ApiError {
    /// No access token is configured
    #[error("No access token configured")]
    NoCredential,

    /// Network or protocol failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("API returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body did not have the expected shape
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether the server rejected the credential
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: 401, .. })
    }
}

/// Errors from end-to-end decryption
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// Decryption was requested but no key has been derived or imported
    #[error("Encryption is not configured")]
    NotConfigured,

    /// Password or account iden missing
    #[error("Password and account iden are required")]
    MissingInput,

    /// Blob or key export is not valid base64
    #[error("Invalid base64: {0}")]
    InvalidBase64(String),

    /// Version byte is not one we understand
    #[error("Unsupported encryption version byte 0x{0:02x}")]
    UnsupportedVersion(u8),

    /// Blob is shorter than version + tag + nonce
    #[error("Encrypted blob is truncated ({len} bytes)")]
    Truncated { len: usize },

    /// Imported key has the wrong size
    #[error("Invalid key length {0}, expected 32 bytes")]
    InvalidKeyLength(usize),

    /// Authentication failed: wrong key or tampered ciphertext
    #[error("Decryption failed (wrong key or corrupted data)")]
    Decryption,
}

/// Errors from local persistence
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to read a file
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write a file
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File exists but does not parse
    #[error("Stored state at '{path}' is corrupted: {details}")]
    Corrupt { path: PathBuf, details: String },

    /// Value could not be serialized
    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the manager may continue with an empty value
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from talking to a running connection manager
#[derive(Error, Debug)]
pub enum ManagerError {
    /// The manager task has shut down
    #[error("Connection manager is not running")]
    Stopped,

    /// The request reached the API and failed there
    #[error(transparent)]
    Api(#[from] ApiError),
}
