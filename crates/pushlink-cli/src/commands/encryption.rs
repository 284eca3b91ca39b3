//! End-to-end encryption password

use std::io::{self, Write};

use anyhow::{bail, Context, Result};

use pushlink_core::{Config, CredentialStore, PushCrypto};

use crate::output::Output;

/// Derive the key from a password and store its export
///
/// The key is salted with the account iden, so this needs a valid token.
pub async fn set(config: &Config, password: Option<String>, output: &Output) -> Result<()> {
    let credentials = CredentialStore::new(config);
    let token = super::require_token(&credentials)?;

    let password = match password {
        Some(password) => password,
        None => prompt_password()?,
    };
    if password.is_empty() {
        bail!("Encryption password is empty");
    }

    let user = super::api(config)?
        .current_user(&token)
        .await
        .context("Failed to look up account")?;

    let mut crypto = PushCrypto::new();
    crypto.initialize(&password, &user.iden)?;
    credentials
        .save_encryption_key(&crypto.export_key()?)
        .context("Failed to store encryption key")?;

    output.success("Encryption password set");
    Ok(())
}

/// Forget the stored key
pub fn clear(config: &Config, output: &Output) -> Result<()> {
    CredentialStore::new(config)
        .clear_encryption_key()
        .context("Failed to remove encryption key")?;
    output.success("Encryption password cleared");
    Ok(())
}

fn prompt_password() -> Result<String> {
    print!("Encryption password: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}
