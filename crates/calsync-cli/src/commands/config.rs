//! Configuration commands.

use std::path::Path;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Dumps the configuration. Secret fields are masked unless they are
/// references.
pub fn dump(config: &ClientConfig, path: &Path) -> ClientResult<()> {
    let masked = masked(config);
    let toml_str = toml::to_string_pretty(&masked)
        .map_err(|e| ClientError::config(format!("failed to serialize config: {e}")))?;
    println!("# config.toml ({})", path.display());
    println!("{toml_str}");
    Ok(())
}

fn masked(config: &ClientConfig) -> ClientConfig {
    let mut config = config.clone();
    let mask = |value: &mut Option<String>| {
        if let Some(v) = value
            && !v.starts_with("pass::")
            && !v.starts_with("env::")
        {
            *v = "********".to_string();
        }
    };
    if let Some(account) = config.account.as_mut() {
        mask(&mut account.password);
    }
    mask(&mut config.session.access_token);
    config
}

/// Checks that every configured value can be used.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    config.session()?;
    config.proxy_channel()?;

    if let Some(account) = &config.account {
        let caldav = account.to_caldav_config()?;
        if caldav.credential_source().is_err() {
            println!("No password or setting_id configured; stored credentials will be used.");
        } else {
            caldav.validate()?;
        }
    } else {
        println!("No [account] section; only `normalize` and `config` commands will work.");
    }

    println!("Configuration is valid.");
    Ok(())
}

pub fn path(config: &ClientConfig, config_path: &Path) -> ClientResult<()> {
    println!("config: {}", config_path.display());
    println!("data:   {}", config.data_dir().display());
    Ok(())
}
