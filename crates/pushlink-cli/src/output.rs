//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{Local, TimeZone};
use serde::Serialize;

use pushlink_core::{Notification, PushRecord, SentPush};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a list of cached pushes
    pub fn print_pushes(&self, pushes: &[PushRecord]) {
        match self.format {
            OutputFormat::Human => {
                if pushes.is_empty() {
                    println!("No pushes cached.");
                    return;
                }
                for push in pushes {
                    let marker = if push.dismissed { " " } else { "*" };
                    println!(
                        "{} {} | {:<5} | {} | {}",
                        marker,
                        format_time(push.modified),
                        push.kind.as_str(),
                        truncate(push.title.as_deref().unwrap_or(""), 25),
                        truncate_line(&push.notification_body(), 45)
                    );
                }
                println!("\n{} push(es)", pushes.len());
            }
            OutputFormat::Json => print_json(pushes),
            OutputFormat::Quiet => {
                for push in pushes {
                    println!("{}", push.iden);
                }
            }
        }
    }

    /// Print a push this client just sent
    pub fn print_sent(&self, sent: &SentPush) {
        match self.format {
            OutputFormat::Human => {
                println!("✓ Sent {} push {}", sent.push.kind.as_str(), sent.push.iden);
            }
            OutputFormat::Json => print_json(sent),
            OutputFormat::Quiet => println!("{}", sent.push.iden),
        }
    }

    /// Render a desktop notification
    pub fn print_notification(&self, notification: &Notification) {
        match self.format {
            OutputFormat::Human => {
                println!("🔔 {}", notification.title);
                if !notification.body.is_empty() {
                    for line in notification.body.lines() {
                        println!("   {}", line);
                    }
                }
                if let Some(ref url) = notification.url {
                    println!("   {}", url);
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"event": "notification", "notification": notification})
                );
            }
            OutputFormat::Quiet => println!("{}", notification.id),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr (suppressed in quiet mode)
    pub fn warn(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => eprintln!("⚠ {}", msg),
            OutputFormat::Json => {
                eprintln!("{}", serde_json::json!({"warning": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// Local time for a server timestamp (seconds since epoch)
fn format_time(secs: f64) -> String {
    match Local.timestamp_opt(secs as i64, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}
