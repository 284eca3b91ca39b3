//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use pushlink_core::Config;

use crate::output::{Output, OutputFormat};

/// Keys accepted by `config set`
const KEYS: &[&str] = &[
    "data_dir",
    "api_url",
    "stream_url",
    "local_device_iden",
    "device_nickname",
    "auto_open_links",
    "log_file",
    "notifications.only_browser_pushes",
    "notifications.hide_browser_pushes",
    "notifications.notification_mirroring",
    "notifications.muted_packages",
    "notifications.require_interaction",
    "notifications.require_interaction_mirrored",
    "connection.heartbeat_timeout_secs",
    "connection.keepalive_interval_secs",
    "connection.retry_interval_secs",
    "connection.sweep_interval_secs",
    "connection.max_attempts",
    "connection.connect_timeout_secs",
];

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            let notifications = &config.notifications;
            let connection = &config.connection;

            println!("Configuration:");
            println!("  data_dir:          {}", config.data_dir.display());
            println!("  api_url:           {}", config.api_url);
            println!("  stream_url:        {}", config.stream_url);
            println!(
                "  local_device_iden: {}",
                config.local_device_iden.as_deref().unwrap_or("(not set)")
            );
            println!("  device_nickname:   {}", config.device_nickname);
            println!("  auto_open_links:   {}", config.auto_open_links);
            println!(
                "  log_file:          {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Notifications:");
            println!("  only_browser_pushes:          {}", notifications.only_browser_pushes);
            println!("  hide_browser_pushes:          {}", notifications.hide_browser_pushes);
            println!("  notification_mirroring:       {}", notifications.notification_mirroring);
            println!(
                "  muted_packages:               {}",
                if notifications.muted_packages.is_empty() {
                    "(none)".to_string()
                } else {
                    notifications.muted_packages.join(", ")
                }
            );
            println!("  require_interaction:          {}", notifications.require_interaction);
            println!(
                "  require_interaction_mirrored: {}",
                notifications.require_interaction_mirrored
            );
            println!();
            println!("Connection:");
            println!("  heartbeat_timeout_secs:  {}", connection.heartbeat_timeout_secs);
            println!("  keepalive_interval_secs: {}", connection.keepalive_interval_secs);
            println!("  retry_interval_secs:     {}", connection.retry_interval_secs);
            println!("  sweep_interval_secs:     {}", connection.sweep_interval_secs);
            println!("  max_attempts:            {}", connection.max_attempts);
            println!("  connect_timeout_secs:    {}", connection.connect_timeout_secs);
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let notifications = &mut config.notifications;
    let connection = &mut config.connection;

    match key {
        "data_dir" => config.data_dir = value.into(),
        "api_url" => config.api_url = value.to_string(),
        "stream_url" => config.stream_url = value.to_string(),
        "local_device_iden" => config.local_device_iden = optional(value),
        "device_nickname" => config.device_nickname = value.to_string(),
        "auto_open_links" => config.auto_open_links = flag(key, value)?,
        "log_file" => config.log_file = optional(value).map(PathBuf::from),
        "notifications.only_browser_pushes" => notifications.only_browser_pushes = flag(key, value)?,
        "notifications.hide_browser_pushes" => notifications.hide_browser_pushes = flag(key, value)?,
        "notifications.notification_mirroring" => {
            notifications.notification_mirroring = flag(key, value)?
        }
        "notifications.muted_packages" => {
            notifications.muted_packages = value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty() && *p != "none")
                .map(str::to_string)
                .collect();
        }
        "notifications.require_interaction" => notifications.require_interaction = flag(key, value)?,
        "notifications.require_interaction_mirrored" => {
            notifications.require_interaction_mirrored = flag(key, value)?
        }
        "connection.heartbeat_timeout_secs" => connection.heartbeat_timeout_secs = number(key, value)?,
        "connection.keepalive_interval_secs" => {
            connection.keepalive_interval_secs = number(key, value)?
        }
        "connection.retry_interval_secs" => connection.retry_interval_secs = number(key, value)?,
        "connection.sweep_interval_secs" => connection.sweep_interval_secs = number(key, value)?,
        "connection.max_attempts" => connection.max_attempts = number(key, value)?,
        "connection.connect_timeout_secs" => connection.connect_timeout_secs = number(key, value)?,
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                KEYS.join(", ")
            );
        }
    }
    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn flag(key: &str, value: &str) -> Result<bool> {
    value
        .parse()
        .with_context(|| format!("Invalid value for {}. Use 'true' or 'false'.", key))
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid value for {}. Expected a number.", key))
}
