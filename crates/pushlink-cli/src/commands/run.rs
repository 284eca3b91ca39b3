//! Run command: keep the stream up and surface notifications

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{debug, info, warn};

use pushlink_core::{
    Config, ConnectionManager, CredentialSource, CredentialStore, Desktop, ManagerEvent,
    Notification,
};

use crate::output::{Output, OutputFormat};

/// Renders notifications on the terminal and opens links in the browser
pub struct TerminalDesktop {
    format: OutputFormat,
}

impl TerminalDesktop {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl Desktop for TerminalDesktop {
    fn show(&self, notification: &Notification) {
        Output::new(self.format).print_notification(notification);
    }

    fn clear(&self, id: &str) {
        debug!("Notification {} cleared", id);
    }

    fn open_url(&self, url: &str) {
        if let Err(e) = open::that(url) {
            warn!("Failed to open {}: {}", url, e);
        }
    }
}

/// Run until interrupted
///
/// SIGHUP re-reads the stored credential and reconnects, which is also how
/// to retry after the reconnection budget is used up.
pub async fn run(config: Config, output: &Output) -> Result<()> {
    if CredentialStore::new(&config).access_token().is_none() {
        output.warn("Not signed in. Run `pushlink login --token <access token>`, then send SIGHUP.");
    }

    let desktop = Arc::new(TerminalDesktop::new(output.format));
    let parts = super::collaborators(&config, desktop)?;
    let mut handle = ConnectionManager::start(config, parts);
    let mut reload = ReloadSignal::install();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }

            _ = reload.recv() => {
                info!("Reloading credential");
                handle.credential_updated().await?;
            }

            event = handle.event_rx.recv() => {
                match event {
                    Some(event) => report_event(&event, output),
                    None => break,
                }
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}

fn report_event(event: &ManagerEvent, output: &Output) {
    match event {
        ManagerEvent::StatusChanged(state) => {
            output.message(&format!("Connection {}", state));
        }
        ManagerEvent::PushesUpdated {
            new,
            updated,
            notified,
        } => {
            debug!("Sync: {} new, {} updated, {} notified", new, updated, notified);
        }
        ManagerEvent::PushSent(record) => debug!("Sent push {}", record.iden),
        ManagerEvent::MirrorReceived(mirror) => {
            debug!("Mirror from {}", mirror.package_name)
        }
        ManagerEvent::Failure { kind, message } if kind.is_user_actionable() => {
            output.warn(&format!("{}. Send SIGHUP to retry.", message));
        }
        ManagerEvent::Failure { kind, message } => debug!("{} failure: {}", kind, message),
        ManagerEvent::EncryptionRequired => {
            output.warn(
                "Received an encrypted notification but no encryption password is set. \
                 Run `pushlink encryption set`, then send SIGHUP.",
            );
        }
    }
}

#[cfg(unix)]
struct ReloadSignal(Option<signal::unix::Signal>);

#[cfg(unix)]
impl ReloadSignal {
    fn install() -> Self {
        match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(signal) => Self(Some(signal)),
            Err(e) => {
                warn!("Failed to install SIGHUP handler: {}", e);
                Self(None)
            }
        }
    }

    async fn recv(&mut self) {
        match self.0.as_mut() {
            Some(signal) => {
                if signal.recv().await.is_none() {
                    self.0 = None;
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(not(unix))]
struct ReloadSignal;

#[cfg(not(unix))]
impl ReloadSignal {
    fn install() -> Self {
        Self
    }

    async fn recv(&mut self) {
        std::future::pending().await
    }
}
