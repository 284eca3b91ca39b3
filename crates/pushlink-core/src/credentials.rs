//! Credential storage
//!
//! The access token and the exported encryption key are kept as plain files
//! in the data directory. The connection manager only reads them when told
//! the credential changed; it never writes them.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::store::atomic_write;

/// Environment variable that overrides the stored access token
pub const ACCESS_TOKEN_ENV: &str = "PUSHLINK_ACCESS_TOKEN";

/// Where the manager reads the credential from
pub trait CredentialSource: Send + Sync + 'static {
    /// Current access token, if signed in
    fn access_token(&self) -> Option<String>;

    /// Exported end-to-end encryption key, if configured
    fn encryption_key(&self) -> Option<String> {
        None
    }
}

/// File-backed credentials
#[derive(Debug, Clone)]
pub struct CredentialStore {
    token_path: PathBuf,
    key_path: PathBuf,
}

impl CredentialStore {
    pub fn new(config: &Config) -> Self {
        Self {
            token_path: config.credential_path(),
            key_path: config.encryption_key_path(),
        }
    }

    pub fn save_access_token(&self, token: &str) -> StoreResult<()> {
        atomic_write(&self.token_path, token.trim().as_bytes())
    }

    pub fn save_encryption_key(&self, exported: &str) -> StoreResult<()> {
        atomic_write(&self.key_path, exported.trim().as_bytes())
    }

    pub fn clear_encryption_key(&self) -> StoreResult<()> {
        remove_if_exists(&self.key_path)
    }

    /// Remove token and key (sign-out)
    pub fn clear(&self) -> StoreResult<()> {
        remove_if_exists(&self.token_path)?;
        remove_if_exists(&self.key_path)
    }

    fn read(path: &PathBuf) -> Option<String> {
        fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl CredentialSource for CredentialStore {
    fn access_token(&self) -> Option<String> {
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            if !token.is_empty() {
                return Some(token);
            }
        }
        Self::read(&self.token_path)
    }

    fn encryption_key(&self) -> Option<String> {
        Self::read(&self.key_path)
    }
}

fn remove_if_exists(path: &PathBuf) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Write {
            path: path.clone(),
            source,
        }),
    }
}

/// In-memory credentials that can be swapped at runtime
#[derive(Debug, Clone, Default)]
pub struct SharedCredential {
    token: Arc<Mutex<Option<String>>>,
    key: Arc<Mutex<Option<String>>>,
}

impl SharedCredential {
    pub fn new(token: Option<&str>) -> Self {
        let cred = Self::default();
        cred.set_access_token(token);
        cred
    }

    pub fn set_access_token(&self, token: Option<&str>) {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = token.map(str::to_string);
    }

    pub fn set_encryption_key(&self, key: Option<&str>) {
        *self.key.lock().unwrap_or_else(|e| e.into_inner()) = key.map(str::to_string);
    }
}

impl CredentialSource for SharedCredential {
    fn access_token(&self) -> Option<String> {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn encryption_key(&self) -> Option<String> {
        self.key.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
