//! Command handlers

pub mod account;
pub mod config;
pub mod device;
pub mod encryption;
pub mod push;
pub mod run;
pub mod status;

use std::sync::Arc;

use anyhow::{Context, Result};

use pushlink_core::stream::{AssumeOnline, WsConnector};
use pushlink_core::{
    Collaborators, Config, CredentialSource, CredentialStore, Desktop, LocalStore, PushApi,
};

/// Access token, or a hint on how to get one
pub(crate) fn require_token(credentials: &CredentialStore) -> Result<String> {
    credentials
        .access_token()
        .context("Not signed in. Run `pushlink login --token <access token>` first.")
}

pub(crate) fn api(config: &Config) -> Result<PushApi> {
    PushApi::new(&config.api_url).context("Failed to create HTTP client")
}

/// Production collaborators for the connection manager
pub(crate) fn collaborators(config: &Config, desktop: Arc<dyn Desktop>) -> Result<Collaborators> {
    Ok(Collaborators {
        credentials: Arc::new(CredentialStore::new(config)),
        connector: Arc::new(WsConnector::new(config.connection.connect_timeout())),
        service: Arc::new(api(config)?),
        network: Arc::new(AssumeOnline),
        desktop,
        store: LocalStore::open(config.data_dir.clone()),
    })
}
