use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use smack_types::api::CreateReminderRequest;
use smack_types::events::WsEvent;
use smack_types::models::{MessageWithUser, Reminder};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

/// Sweep cadence for due reminders.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub async fn create(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateReminderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.message.is_empty() {
        return Err(ApiError::bad_request("Message is required"));
    }

    let remind_at = parse_remind_time(&req.remind_at)
        .ok_or_else(|| ApiError::bad_request("Invalid time format"))?;

    let reminder = state
        .db
        .create_reminder(&user_id, &req.channel_id, &req.message, remind_at)?;

    Ok((StatusCode::CREATED, Json(reminder)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.db.get_reminders_for_user(&user_id)?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(reminder_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.delete_reminder(&reminder_id, &user_id)?;
    Ok(Json(json!({ "status": "deleted" })))
}

/// Spawns the periodic sweep: every tick, each due reminder becomes a
/// smackbot DM message plus a targeted `reminder` event, then is marked
/// complete. One bad reminder never blocks the rest.
pub fn spawn_scheduler(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await; // skip the immediate first tick

        loop {
            ticker.tick().await;
            sweep(&state).await;
        }
    });
}

async fn sweep(state: &AppState) {
    let due = match state.db.get_due_reminders() {
        Ok(due) => due,
        Err(e) => {
            warn!("Reminder sweep query failed: {}", e);
            return;
        }
    };

    for reminder in due {
        if let Err(e) = deliver(state, &reminder).await {
            warn!("Failed to deliver reminder {}: {}", reminder.id, e);
        }
    }
}

async fn deliver(state: &AppState, reminder: &Reminder) -> anyhow::Result<()> {
    let dm = state.db.get_or_create_smackbot_dm(&reminder.user_id)?;
    let smackbot = state
        .db
        .get_smackbot()?
        .ok_or_else(|| anyhow::anyhow!("smackbot user missing"))?;

    let content = format!("🔔 **Reminder:** {}", reminder.message);
    let msg = state.db.create_message(&dm.id, &smackbot.id, &content, None)?;

    state
        .hub
        .broadcast_to_channel(
            &dm.id,
            &WsEvent::NewMessage(MessageWithUser {
                message: msg,
                user: smackbot.to_response(),
                reply_count: 0,
                latest_reply: None,
            }),
        )
        .await;

    state
        .hub
        .send_to_user(&reminder.user_id, &WsEvent::Reminder(reminder.clone()))
        .await;

    state.db.mark_reminder_complete(&reminder.id)?;
    info!("Delivered reminder {} to {}", reminder.id, reminder.user_id);
    Ok(())
}

/// Accepts ISO-8601 timestamps, a few plain formats, and relative phrases
/// like "in 5 minutes", "tomorrow", or "2h".
fn parse_remind_time(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim().to_lowercase();

    if let Ok(dt) = DateTime::parse_from_rfc3339(&input) {
        return Some(dt.to_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&input, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(&input, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }

    let now = Utc::now();
    match input.as_str() {
        "tomorrow" => return Some(now + chrono::Duration::hours(24)),
        "next week" => return Some(now + chrono::Duration::days(7)),
        _ => {}
    }

    let relative = input.strip_prefix("in ").unwrap_or(&input);
    parse_relative(relative).map(|delta| now + delta)
}

/// "5 minutes", "1 hour", "2 days", or compact forms like "5min" / "1hr".
fn parse_relative(input: &str) -> Option<chrono::Duration> {
    let input = input.trim();

    let (value, unit) = match input.split_once(' ') {
        Some((value, unit)) => (value.parse::<i64>().ok()?, unit.trim()),
        None => {
            let split = input.find(|c: char| !c.is_ascii_digit())?;
            (input[..split].parse::<i64>().ok()?, input[split..].trim())
        }
    };

    let unit = unit.trim_end_matches('s');
    match unit {
        "second" | "sec" => Some(chrono::Duration::seconds(value)),
        "minute" | "min" | "m" => Some(chrono::Duration::minutes(value)),
        "hour" | "hr" | "h" => Some(chrono::Duration::hours(value)),
        "day" | "d" => Some(chrono::Duration::days(value)),
        "week" | "w" => Some(chrono::Duration::weeks(value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_formats_parse() {
        assert!(parse_remind_time("2030-05-01T10:00:00Z").is_some());
        assert!(parse_remind_time("2030-05-01 10:00:00").is_some());
        assert!(parse_remind_time("2030-05-01").is_some());
    }

    #[test]
    fn relative_phrases_parse() {
        let now = Utc::now();
        let in_five = parse_remind_time("in 5 minutes").unwrap();
        assert!(in_five > now + chrono::Duration::minutes(4));
        assert!(in_five < now + chrono::Duration::minutes(6));

        assert!(parse_remind_time("tomorrow").is_some());
        assert!(parse_remind_time("next week").is_some());
        assert!(parse_remind_time("2h").is_some());
        assert!(parse_remind_time("30min").is_some());
    }

    #[test]
    fn junk_is_rejected() {
        assert!(parse_remind_time("whenever").is_none());
        assert!(parse_remind_time("5 fortnights").is_none());
        assert!(parse_remind_time("").is_none());
    }
}
