//! Credential commands.

use calsync_engine::StoredCredentials;

use super::Context;
use crate::error::{ClientError, ClientResult};
use crate::secret;

/// Shows what is stored for the session. Passwords are never printed.
pub async fn show(ctx: &Context) -> ClientResult<()> {
    match ctx.sync.credentials().load_settings(&ctx.session).await? {
        Some(stored) => print!("{}", describe(&stored)),
        None => println!("No stored credentials."),
    }
    Ok(())
}

fn describe(stored: &StoredCredentials) -> String {
    let mut out = format!("server:   {}\nusername: {}\n", stored.server_url, stored.username);
    if let Some(id) = &stored.setting_id {
        out.push_str(&format!("setting:  {id}\n"));
    }
    out.push_str(&format!(
        "password: {}\n",
        if stored.has_password { "stored" } else { "not stored" }
    ));
    if !stored.authoritative {
        out.push_str("source:   legacy local record; run `calsync credentials migrate`\n");
    }
    out
}

/// The configured account password, required for save and migrate.
fn configured_password(ctx: &Context) -> ClientResult<String> {
    let account = ctx.config.account()?;
    secret::resolve_opt(account.password.as_deref())?
        .ok_or_else(|| ClientError::config("account.password is required for this command"))
}

/// Stores the configured account behind the proxy.
pub async fn save(ctx: &Context) -> ClientResult<()> {
    let account = ctx.config.account()?;
    let password = configured_password(ctx)?;
    let setting_id = ctx
        .sync
        .credentials()
        .save_settings(&ctx.session, &account.server_url, &account.username, &password)
        .await?;
    println!("Saved credentials (setting {setting_id}).");
    Ok(())
}

pub async fn delete(ctx: &Context) -> ClientResult<()> {
    ctx.sync.credentials().delete_settings(&ctx.session).await?;
    println!("Deleted stored credentials.");
    Ok(())
}

/// Moves the legacy record to the proxy with the configured password.
pub async fn migrate(ctx: &Context) -> ClientResult<()> {
    let password = configured_password(ctx)?;
    let setting_id = ctx
        .sync
        .credentials()
        .migrate_legacy(&ctx.session, &password)
        .await?;
    println!("Migrated legacy credentials (setting {setting_id}).");
    Ok(())
}
