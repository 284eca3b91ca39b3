//! Push command handlers

use std::sync::Arc;

use anyhow::{Context, Result};

use pushlink_core::{
    Config, CredentialStore, DeltaSync, LocalStore, NotificationDispatch, OutgoingPush,
    PushService, SentPush,
};

use super::run::TerminalDesktop;
use crate::output::Output;

/// List cached pushes, newest first
pub fn list(config: &Config, limit: usize, output: &Output) -> Result<()> {
    let store = LocalStore::open(config.data_dir.clone());
    let mut pushes = store.pushes().context("Failed to read cached pushes")?;
    pushes.truncate(limit);
    output.print_pushes(&pushes);
    Ok(())
}

/// Run one sync pass and surface anything new
pub async fn refresh(config: &Config, output: &Output) -> Result<()> {
    let token = super::require_token(&CredentialStore::new(config))?;
    let store = LocalStore::open(config.data_dir.clone());
    let mut sync = DeltaSync::load(store.clone());

    let window = sync.plan();
    let page = super::api(config)?
        .fetch_pushes(&token, window)
        .await
        .context("Failed to fetch pushes")?;
    let outcome = sync.apply(window, page);

    let desktop = Arc::new(TerminalDesktop::new(output.format));
    let mut dispatch = NotificationDispatch::new(config, store, desktop);
    dispatch.on_sync(&outcome);

    if outcome.notify {
        output.success(&format!(
            "{} new, {} updated",
            outcome.new.len(),
            outcome.updated.len()
        ));
    } else {
        output.success(&format!(
            "Fetched {} pushes of history",
            outcome.new.len()
        ));
    }
    Ok(())
}

/// Send a push and record it in the sent list
pub async fn send(config: &Config, push: OutgoingPush, output: &Output) -> Result<()> {
    let token = super::require_token(&CredentialStore::new(config))?;

    let record = super::api(config)?
        .send_push(&token, push)
        .await
        .context("Failed to send push")?;

    let sent = SentPush::now(record);
    LocalStore::open(config.data_dir.clone())
        .record_sent(sent.clone())
        .context("Failed to record sent push")?;

    output.print_sent(&sent);
    Ok(())
}
