use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use smack_types::models::{Bot, Channel};

use crate::{format_ts, now_ts, parse_ts, Database};

fn bot_from_row(row: &Row) -> rusqlite::Result<Bot> {
    Ok(Bot {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        provider: row.get(4)?,
        model: row.get(5)?,
        avatar_url: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        created_at: parse_ts(&row.get::<_, String>(7)?),
    })
}

const BOT_COLS: &str = "id, name, display_name, description, provider, model, avatar_url, created_at";

impl Database {
    /// Creates the bot configuration and its paired user row (same id) so
    /// the bot can author messages. Idempotent.
    pub fn create_bot(
        &self,
        id: &str,
        name: &str,
        display_name: &str,
        description: &str,
        provider: &str,
        model: &str,
        avatar_url: &str,
    ) -> Result<Bot> {
        let bot = Bot {
            id: id.to_string(),
            name: name.to_string(),
            display_name: display_name.to_string(),
            description: description.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            avatar_url: avatar_url.to_string(),
            created_at: Utc::now(),
        };

        self.ensure_bot_user(id, &format!("bot-{name}"), display_name, avatar_url)?;

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO bots (id, name, display_name, description, provider, model, avatar_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    bot.id,
                    bot.name,
                    bot.display_name,
                    bot.description,
                    bot.provider,
                    bot.model,
                    bot.avatar_url,
                    format_ts(bot.created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(bot)
    }

    pub fn get_bot(&self, id: &str) -> Result<Option<Bot>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {BOT_COLS} FROM bots WHERE id = ?1"))?;
            Ok(stmt.query_row([id], bot_from_row).optional()?)
        })
    }

    pub fn get_all_bots(&self) -> Result<Vec<Bot>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {BOT_COLS} FROM bots ORDER BY name"))?;
            let rows = stmt
                .query_map([], bot_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The per-(user, bot) DM channel, created and bound on first use.
    /// The binding is what routes the AI mediator into the channel.
    pub fn get_or_create_bot_dm_channel(&self, user_id: &str, bot_id: &str) -> Result<Channel> {
        let existing: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT channel_id FROM bot_channels WHERE bot_id = ?1 AND user_id = ?2",
                    params![bot_id, user_id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        if let Some(id) = existing {
            if let Some(channel) = self.get_channel(&id)? {
                return Ok(channel);
            }
        }

        let bot = self
            .get_bot(bot_id)?
            .ok_or_else(|| anyhow::anyhow!("bot not found: {bot_id}"))?;

        let short_bot: String = bot_id.chars().take(8).collect();
        let short_user: String = user_id.chars().take(8).collect();
        let mut channel = self.create_channel(
            &format!("bot-dm-{short_bot}-{short_user}"),
            "",
            user_id,
            true,
        )?;

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO bot_channels (channel_id, bot_id, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![channel.id, bot_id, user_id, now_ts()],
            )?;
            Ok(())
        })?;

        channel.name = bot.display_name;
        Ok(channel)
    }

    pub fn get_bot_for_channel(&self, channel_id: &str) -> Result<Option<Bot>> {
        let bot_id: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT bot_id FROM bot_channels WHERE channel_id = ?1",
                    [channel_id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        match bot_id {
            Some(id) => self.get_bot(&id),
            None => Ok(None),
        }
    }

    pub fn is_bot_channel(&self, channel_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM bot_channels WHERE channel_id = ?1",
                [channel_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }
}
