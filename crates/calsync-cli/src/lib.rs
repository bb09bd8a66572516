//! calsync command-line interface.
//!
//! Hosts [`calsync_engine::CalendarSync`] behind a small set of subcommands
//! driven by a TOML config file.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod secret;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
