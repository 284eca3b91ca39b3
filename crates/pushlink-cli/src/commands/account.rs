//! Sign-in and sign-out

use anyhow::{bail, Context, Result};

use pushlink_core::{Config, CredentialStore, DeltaSync, LocalStore};

use crate::output::{Output, OutputFormat};

/// Verify an access token against the API and store it
pub async fn login(config: &Config, token: String, output: &Output) -> Result<()> {
    let token = token.trim().to_string();
    if token.is_empty() {
        bail!("Access token is empty");
    }

    let user = super::api(config)?
        .current_user(&token)
        .await
        .context("Access token was not accepted")?;

    CredentialStore::new(config)
        .save_access_token(&token)
        .context("Failed to store access token")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({"status": "success", "user": user})
            );
        }
        OutputFormat::Quiet => println!("{}", user.iden),
        OutputFormat::Human => {
            let who = user.email.as_deref().or(user.name.as_deref()).unwrap_or(&user.iden);
            output.success(&format!("Signed in as {}", who));
            if config.local_device_iden.is_none() {
                println!("Register this client as a device with: pushlink device setup");
            }
        }
    }

    Ok(())
}

/// Remove the credential, the encryption key and all local sync state
pub fn logout(config: &Config, output: &Output) -> Result<()> {
    CredentialStore::new(config)
        .clear()
        .context("Failed to remove stored credentials")?;

    DeltaSync::load(LocalStore::open(config.data_dir.clone())).reset();

    output.success("Signed out and cleared local state");
    Ok(())
}
