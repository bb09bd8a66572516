//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// calsync - read-only CalDAV calendar sync
#[derive(Debug, Parser)]
#[command(name = "calsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CALSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the account's calendars
    Calendars {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Choose which calendars to sync
    Select {
        /// Calendar URLs, absolute or relative to the server
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Pull changes for the selected calendars
    Sync {
        /// Sync these calendars instead of the saved selection
        #[arg(long = "calendar", action = clap::ArgAction::Append)]
        calendars: Vec<String>,

        /// Output the report in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove all synced events, sync state and stored credentials
    Disconnect {
        /// Confirm the removal
        #[arg(long)]
        yes: bool,
    },

    /// Print the canonical form of a calendar URL
    Normalize {
        url: String,

        /// Resolve relative URLs against this server
        #[arg(long)]
        server: Option<String>,
    },

    /// Credential commands
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum CredentialsAction {
    /// Show the stored account (never the password)
    Show,

    /// Store the configured account's password behind the proxy
    Save,

    /// Delete stored credentials
    Delete,

    /// Move a legacy local record to the proxy
    Migrate,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration and data paths
    Path,
}
