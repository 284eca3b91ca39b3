//! Pushlink CLI
//!
//! Command-line interface for pushlink - Pushbullet pushes and mirrored
//! notifications on the desktop.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pushlink_core::{Config, OutgoingPush};

mod commands;
mod output;

use output::{Output, OutputFormat};

/// Environment variable holding a tracing filter directive
const LOG_ENV: &str = "PUSHLINK_LOG";

#[derive(Parser)]
#[command(name = "pushlink")]
#[command(about = "Pushlink - Pushbullet on the desktop")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the stream connected and show notifications (default)
    Run,
    /// Show account, connection and sync status
    Status {
        /// Open a stream to verify the connection
        #[arg(long)]
        check: bool,
    },
    /// Store an access token
    Login {
        /// Access token from the account settings page
        #[arg(long, env = "PUSHLINK_ACCESS_TOKEN")]
        token: String,
    },
    /// Remove the access token and all local state
    Logout,
    /// List cached pushes
    #[command(alias = "ls")]
    List {
        /// Maximum number of pushes to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Fetch pushes changed since the last sync
    Refresh,
    /// Send a push
    Push {
        #[command(subcommand)]
        command: PushCommands,

        /// Target device iden (default: all devices)
        #[arg(long, global = true)]
        device: Option<String>,

        /// Send to another user by email
        #[arg(long, global = true)]
        email: Option<String>,
    },
    /// Manage the end-to-end encryption password
    Encryption {
        #[command(subcommand)]
        command: EncryptionCommands,
    },
    /// Device registration
    Device {
        #[command(subcommand)]
        command: DeviceCommands,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum PushCommands {
    /// Send a note
    Note {
        /// Note text
        body: String,
        /// Note title
        #[arg(short = 'T', long)]
        title: Option<String>,
    },
    /// Send a link
    Link {
        /// URL to send
        url: String,
        /// Link title
        #[arg(short = 'T', long)]
        title: Option<String>,
        /// Message to go with the link
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Send an already uploaded file
    File {
        /// File name shown to the receiver
        file_name: String,
        /// URL of the uploaded file
        file_url: String,
        /// MIME type
        #[arg(long, default_value = "application/octet-stream")]
        file_type: String,
        /// Message to go with the file
        #[arg(short, long)]
        body: Option<String>,
    },
}

#[derive(Subcommand)]
enum EncryptionCommands {
    /// Set the password (prompts when not given)
    Set {
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored key
    Clear,
}

#[derive(Subcommand)]
enum DeviceCommands {
    /// Find or register this client as a device
    Setup,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g. auto_open_links, notifications.muted_packages)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work even when the config file is broken
    if let Some(Commands::Config { command }) = &cli.command {
        return match command {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key.clone(), value.clone(), config_path, &output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    let long_running = matches!(cli.command, None | Some(Commands::Run));
    init_logging(&config, cli.verbose, long_running);

    match cli.command {
        None | Some(Commands::Run) => commands::run::run(config, &output).await,
        Some(Commands::Status { check }) => commands::status::show(&config, check, &output).await,
        Some(Commands::Login { token }) => commands::account::login(&config, token, &output).await,
        Some(Commands::Logout) => commands::account::logout(&config, &output),
        Some(Commands::List { limit }) => commands::push::list(&config, limit, &output),
        Some(Commands::Refresh) => commands::push::refresh(&config, &output).await,
        Some(Commands::Push {
            command,
            device,
            email,
        }) => {
            let mut push = match command {
                PushCommands::Note { body, title } => OutgoingPush::note(title, body),
                PushCommands::Link { url, title, body } => OutgoingPush::link(url, title, body),
                PushCommands::File {
                    file_name,
                    file_url,
                    file_type,
                    body,
                } => OutgoingPush::file(file_name, file_type, file_url, body),
            };
            if let Some(device) = device {
                push = push.to_device(device);
            }
            if let Some(email) = email {
                push = push.to_email(email);
            }
            commands::push::send(&config, push, &output).await
        }
        Some(Commands::Encryption { command }) => match command {
            EncryptionCommands::Set { password } => {
                commands::encryption::set(&config, password, &output).await
            }
            EncryptionCommands::Clear => commands::encryption::clear(&config, &output),
        },
        Some(Commands::Device {
            command: DeviceCommands::Setup,
        }) => commands::device::setup(config_path, &output).await,
        Some(Commands::Config { .. }) => unreachable!(), // Handled above
    }
}

/// Log to the configured file, or stderr
///
/// One-shot commands only log warnings unless `--verbose` is given;
/// `PUSHLINK_LOG` overrides both.
fn init_logging(config: &Config, verbose: bool, long_running: bool) {
    let level = match (verbose, long_running) {
        (true, _) => "debug",
        (false, true) => "info",
        (false, false) => "warn",
    };
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(format!("pushlink_core={},pushlink_cli={}", level, level))
    });

    match &config.log_file {
        Some(path) => {
            let file = match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                    return;
                }
            };
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}
