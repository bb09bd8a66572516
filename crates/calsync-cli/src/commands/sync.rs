//! Sync, disconnect and URL normalization.

use calsync_engine::{CalendarSync, SyncReport};
use tracing::info;

use super::Context;
use crate::error::{ClientError, ClientResult};

/// Syncs `calendars`, or the saved selection when none are given.
pub async fn sync(ctx: &Context, calendars: &[String], json: bool) -> ClientResult<()> {
    let caldav = ctx.caldav_config().await?;
    let settings = ctx.sync.state().get(&ctx.session)?;

    let urls: Vec<String> = if calendars.is_empty() {
        settings
            .as_ref()
            .map(|s| s.selected_calendar_urls.iter().map(|u| u.to_string()).collect())
            .unwrap_or_default()
    } else {
        calendars.to_vec()
    };
    if urls.is_empty() {
        return Err(ClientError::Usage(
            "no calendars selected; run `calsync select <url>...` first".to_string(),
        ));
    }

    let last_sync_at = settings.and_then(|s| s.last_sync_at);
    let report = ctx
        .sync
        .sync_selected_calendars(&ctx.session, &caldav, &urls, last_sync_at)
        .await?;
    info!(changes = report.changes(), "sync finished");

    if json {
        let out = serde_json::to_string_pretty(&report)
            .map_err(|e| ClientError::config(format!("failed to serialize report: {e}")))?;
        println!("{out}");
    } else {
        print!("{}", render_report(&report));
    }

    if report.is_complete() {
        Ok(())
    } else {
        Err(ClientError::Usage(format!(
            "{} calendar(s) failed to sync",
            report.failed.len()
        )))
    }
}

fn render_report(report: &SyncReport) -> String {
    let mut out = format!(
        "Synced {} calendar(s): {} inserted, {} updated, {} deleted\n",
        report.synced.len(),
        report.inserted,
        report.updated,
        report.deleted
    );
    if report.conflicts_kept > 0 {
        out.push_str(&format!(
            "Kept {} local edit(s) newer than the server copy\n",
            report.conflicts_kept
        ));
    }
    for failure in &report.failed {
        out.push_str(&format!(
            "Failed {} [{}]: {}\n",
            failure.calendar, failure.kind, failure.message
        ));
    }
    out
}

/// Removes everything calsync stored for the session.
pub async fn disconnect(ctx: &Context, yes: bool) -> ClientResult<()> {
    if !yes {
        return Err(ClientError::Usage(
            "this deletes all synced events and stored credentials; pass --yes to confirm"
                .to_string(),
        ));
    }
    let report = ctx.sync.delete_all_caldav_data(&ctx.session).await?;
    println!(
        "Disconnected: removed {} event(s) from {} calendar(s).",
        report.events_deleted, report.calendars
    );
    Ok(())
}

/// Prints the canonical form of `url`.
pub fn normalize(url: &str, server: Option<&str>) -> ClientResult<()> {
    println!("{}", CalendarSync::normalize_calendar_url(url, server));
    Ok(())
}
