//! Calendar listing and selection.

use calsync_core::{Calendar, CalendarUrl};
use calsync_engine::CalendarSync;

use super::Context;
use crate::error::{ClientError, ClientResult};

/// Lists the account's calendars, marking the selected ones.
pub async fn list(ctx: &Context, json: bool) -> ClientResult<()> {
    let caldav = ctx.caldav_config().await?;
    let calendars = ctx.sync.get_calendars(&ctx.session, &caldav).await?;

    if json {
        let out = serde_json::to_string_pretty(&calendars)
            .map_err(|e| ClientError::config(format!("failed to serialize calendars: {e}")))?;
        println!("{out}");
        return Ok(());
    }

    let settings = ctx.sync.state().get(&ctx.session)?;
    if calendars.is_empty() {
        println!("No calendars found.");
    }
    for calendar in &calendars {
        let selected = settings.as_ref().is_some_and(|s| s.is_selected(&calendar.url));
        println!(
            "{} {}{}\n    {}",
            if selected { "*" } else { " " },
            calendar.display_name,
            flags(calendar),
            calendar.url
        );
    }
    Ok(())
}

fn flags(calendar: &Calendar) -> String {
    let mut flags = Vec::new();
    if calendar.is_subscription {
        flags.push("subscription");
    }
    if calendar.is_shared {
        flags.push("shared");
    }
    if calendar.read_only {
        flags.push("read-only");
    }
    if flags.is_empty() {
        String::new()
    } else {
        format!(" ({})", flags.join(", "))
    }
}

/// Saves the calendars named by `urls` as the sync selection.
pub async fn select(ctx: &Context, urls: &[String]) -> ClientResult<()> {
    let caldav = ctx.caldav_config().await?;
    let calendars = ctx.sync.get_calendars(&ctx.session, &caldav).await?;

    let wanted = resolve_selection(&calendars, urls, &caldav.server_url)?;
    let settings = ctx.sync.select_calendars(&ctx.session, &wanted)?;
    println!("Selected {} calendar(s).", settings.selected_calendar_urls.len());
    Ok(())
}

/// Picks the discovered calendars matching `urls`; unknown URLs are an error.
fn resolve_selection(
    calendars: &[Calendar],
    urls: &[String],
    server_url: &str,
) -> ClientResult<Vec<Calendar>> {
    urls.iter()
        .map(|url| {
            let wanted = CalendarUrl::from(CalendarSync::normalize_calendar_url(url, Some(server_url)));
            calendars
                .iter()
                .find(|c| c.url == wanted)
                .cloned()
                .ok_or_else(|| ClientError::Usage(format!("no calendar at {wanted}")))
        })
        .collect()
}
