//! calsync CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use calsync_cli::cli::{Cli, Command, ConfigAction, CredentialsAction};
use calsync_cli::commands::{self, Context};
use calsync_cli::config::ClientConfig;
use calsync_cli::error::ClientResult;
use calsync_core::tracing::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(TracingConfig::cli(cli.debug)) {
        eprintln!("warning: failed to initialize logging: {e}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            if let Some(hint) = e.hint() {
                eprintln!("{hint}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };

    match cli.command {
        Command::Normalize { url, server } => commands::sync::normalize(&url, server.as_deref()),
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &config_path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config, &config_path),
        },
        Command::Calendars { json } => commands::calendars::list(&Context::open(config)?, json).await,
        Command::Select { urls } => commands::calendars::select(&Context::open(config)?, &urls).await,
        Command::Sync { calendars, json } => {
            commands::sync::sync(&Context::open(config)?, &calendars, json).await
        }
        Command::Disconnect { yes } => commands::sync::disconnect(&Context::open(config)?, yes).await,
        Command::Credentials { action } => {
            let ctx = Context::open(config)?;
            match action {
                CredentialsAction::Show => commands::credentials::show(&ctx).await,
                CredentialsAction::Save => commands::credentials::save(&ctx).await,
                CredentialsAction::Delete => commands::credentials::delete(&ctx).await,
                CredentialsAction::Migrate => commands::credentials::migrate(&ctx).await,
            }
        }
    }
}
