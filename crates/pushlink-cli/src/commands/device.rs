//! Device registration

use std::path::PathBuf;

use anyhow::{Context, Result};

use pushlink_core::{Config, CredentialStore};

use crate::output::{Output, OutputFormat};

/// Find or register this client's device and remember its iden
pub async fn setup(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    let token = super::require_token(&CredentialStore::new(&config))?;

    let device = super::api(&config)?
        .ensure_device(&token, &config.device_nickname)
        .await
        .context("Failed to register device")?;

    config.local_device_iden = Some(device.iden.clone());
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({"device": device}));
        }
        OutputFormat::Quiet => println!("{}", device.iden),
        OutputFormat::Human => {
            output.success(&format!(
                "Using device {} ({})",
                device.nickname.as_deref().unwrap_or(&config.device_nickname),
                device.iden
            ));
        }
    }

    Ok(())
}
