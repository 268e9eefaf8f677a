use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use smack_types::models::Reminder;

use crate::{format_ts, now_ts, parse_ts, Database};

fn reminder_from_row(row: &Row) -> rusqlite::Result<Reminder> {
    Ok(Reminder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        channel_id: row.get(2)?,
        message: row.get(3)?,
        remind_at: parse_ts(&row.get::<_, String>(4)?),
        created_at: parse_ts(&row.get::<_, String>(5)?),
        completed: row.get(6)?,
    })
}

const REMINDER_COLS: &str = "id, user_id, channel_id, message, remind_at, created_at, completed";

impl Database {
    pub fn create_reminder(
        &self,
        user_id: &str,
        channel_id: &str,
        message: &str,
        remind_at: DateTime<Utc>,
    ) -> Result<Reminder> {
        let reminder = Reminder {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            message: message.to_string(),
            remind_at,
            created_at: Utc::now(),
            completed: false,
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO reminders (id, user_id, channel_id, message, remind_at, created_at, completed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                params![
                    reminder.id,
                    reminder.user_id,
                    reminder.channel_id,
                    reminder.message,
                    format_ts(reminder.remind_at),
                    format_ts(reminder.created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(reminder)
    }

    pub fn get_reminders_for_user(&self, user_id: &str) -> Result<Vec<Reminder>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REMINDER_COLS} FROM reminders
                 WHERE user_id = ?1 AND completed = 0
                 ORDER BY remind_at ASC"
            ))?;
            let rows = stmt
                .query_map([user_id], reminder_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Reminders whose due time has passed and that have not fired yet.
    pub fn get_due_reminders(&self) -> Result<Vec<Reminder>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REMINDER_COLS} FROM reminders
                 WHERE completed = 0 AND remind_at <= ?1
                 ORDER BY remind_at ASC"
            ))?;
            let rows = stmt
                .query_map([now_ts()], reminder_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn mark_reminder_complete(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("UPDATE reminders SET completed = 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn delete_reminder(&self, id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM reminders WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
            Ok(())
        })
    }
}
