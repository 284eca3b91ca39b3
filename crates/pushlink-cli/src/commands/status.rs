//! Status command handler

use std::time::Duration;

use anyhow::Result;

use pushlink_core::stream::{check_stream, WsConnector};
use pushlink_core::{Config, ConnectionState, CredentialSource, CredentialStore, LocalStore};

use crate::output::{Output, OutputFormat};

/// How long an opened stream gets to be rejected
const CHECK_GRACE: Duration = Duration::from_secs(2);

/// Show status information
///
/// With `check`, a stream is opened to verify the credential and the
/// connection, then closed again. Local sync state is left untouched.
pub async fn show(config: &Config, check: bool, output: &Output) -> Result<()> {
    let credentials = CredentialStore::new(config);
    let store = LocalStore::open(config.data_dir.clone());

    let signed_in = credentials.access_token().is_some();
    let encryption = credentials.encryption_key().is_some();
    let watermark = store.last_modified().unwrap_or(0.0);
    let cached = store.pushes().map(|p| p.len()).unwrap_or(0);
    let sent = store.sent_messages().map(|s| s.len()).unwrap_or(0);

    let connection = match credentials.access_token() {
        Some(token) if check => Some(check_connection(config, &token).await),
        _ => None,
    };

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "signed_in": signed_in,
                    "encryption": encryption,
                    "local_device_iden": config.local_device_iden,
                    "connection": connection.as_ref().map(|(state, _)| state),
                    "connection_error": connection.as_ref().and_then(|(_, error)| error.clone()),
                    "sync": {
                        "watermark": watermark,
                        "cached_pushes": cached,
                        "sent_pushes": sent
                    }
                })
            );
        }
        OutputFormat::Quiet => match &connection {
            Some((state, _)) => println!("{}", state),
            None if signed_in => println!("signed-in"),
            None => println!("signed-out"),
        },
        OutputFormat::Human => {
            println!("Pushlink Status");
            println!("===============");
            println!();
            println!("Account:");
            println!(
                "  Signed in:  {}",
                if signed_in { "yes" } else { "no" }
            );
            println!(
                "  Encryption: {}",
                if encryption { "configured" } else { "not set" }
            );
            println!(
                "  Device:     {}",
                config.local_device_iden.as_deref().unwrap_or("(not registered)")
            );
            if let Some((state, error)) = &connection {
                println!();
                println!("Connection:");
                println!("  Status:   {}", state);
                if let Some(error) = error {
                    println!("  Error:    {}", error);
                }
            }
            println!();
            println!("Sync:");
            println!("  Watermark:     {}", watermark);
            println!("  Cached pushes: {}", cached);
            println!("  Sent pushes:   {}", sent);
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
        }
    }

    Ok(())
}

/// Open a stream once and report whether it stayed up
async fn check_connection(config: &Config, token: &str) -> (ConnectionState, Option<String>) {
    let connector = WsConnector::new(config.connection.connect_timeout());
    match check_stream(&connector, &config.stream_url_for(token), CHECK_GRACE).await {
        Ok(()) => (ConnectionState::Connected, None),
        Err(e) => (ConnectionState::Disconnected, Some(e.to_string())),
    }
}
