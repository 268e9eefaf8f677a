use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use smack_types::models::Webhook;

use crate::{format_ts, parse_ts, Database};

fn webhook_from_row(row: &Row) -> rusqlite::Result<Webhook> {
    Ok(Webhook {
        id: row.get(0)?,
        name: row.get(1)?,
        channel_id: row.get(2)?,
        token: row.get(3)?,
        created_by: row.get(4)?,
        created_at: parse_ts(&row.get::<_, String>(5)?),
    })
}

const WEBHOOK_COLS: &str = "id, name, channel_id, token, created_by, created_at";

impl Database {
    pub fn create_webhook(&self, name: &str, channel_id: &str, created_by: &str) -> Result<Webhook> {
        let webhook = Webhook {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            channel_id: channel_id.to_string(),
            token: Uuid::new_v4().to_string(),
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO webhooks (id, name, channel_id, token, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    webhook.id,
                    webhook.name,
                    webhook.channel_id,
                    webhook.token,
                    webhook.created_by,
                    format_ts(webhook.created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(webhook)
    }

    pub fn get_webhook(&self, id: &str) -> Result<Option<Webhook>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {WEBHOOK_COLS} FROM webhooks WHERE id = ?1"))?;
            Ok(stmt.query_row([id], webhook_from_row).optional()?)
        })
    }

    /// The (id, token) pair is the capability: both must match.
    pub fn get_webhook_by_token(&self, id: &str, token: &str) -> Result<Option<Webhook>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {WEBHOOK_COLS} FROM webhooks WHERE id = ?1 AND token = ?2"
            ))?;
            Ok(stmt
                .query_row(params![id, token], webhook_from_row)
                .optional()?)
        })
    }

    pub fn get_webhooks_for_channel(&self, channel_id: &str) -> Result<Vec<Webhook>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {WEBHOOK_COLS} FROM webhooks WHERE channel_id = ?1 ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map([channel_id], webhook_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_webhooks_by_user(&self, user_id: &str) -> Result<Vec<Webhook>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {WEBHOOK_COLS} FROM webhooks WHERE created_by = ?1 ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map([user_id], webhook_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_webhook(&self, id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM webhooks WHERE id = ?1 AND created_by = ?2",
                params![id, user_id],
            )?;
            Ok(())
        })
    }
}
