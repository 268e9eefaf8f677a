use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use smack_types::models::{Channel, ChannelWithUnread, User};

use crate::users::{join_channel_inner, user_from_row};
use crate::{format_ts, now_ts, parse_ts, Database};

const CHANNEL_COLS: &str = "id, name, COALESCE(description, ''), is_direct, created_by, created_at";

fn channel_from_row(row: &Row) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_direct: row.get(3)?,
        created_by: row.get(4)?,
        created_at: parse_ts(&row.get::<_, String>(5)?),
    })
}

impl Database {
    pub fn create_channel(
        &self,
        name: &str,
        description: &str,
        created_by: &str,
        is_direct: bool,
    ) -> Result<Channel> {
        let channel = Channel {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            is_direct,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO channels (id, name, description, is_direct, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    channel.id,
                    channel.name,
                    channel.description,
                    channel.is_direct,
                    channel.created_by,
                    format_ts(channel.created_at),
                ],
            )?;
            join_channel_inner(conn, &channel.id, created_by)
        })?;

        Ok(channel)
    }

    pub fn get_channel(&self, id: &str) -> Result<Option<Channel>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {CHANNEL_COLS} FROM channels WHERE id = ?1"))?;
            Ok(stmt.query_row([id], channel_from_row).optional()?)
        })
    }

    pub fn update_channel(&self, id: &str, name: &str, description: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE channels SET name = ?1, description = ?2 WHERE id = ?3",
                params![name, description, id],
            )?;
            Ok(())
        })
    }

    /// Channels the user belongs to, with unread counts (top-level messages
    /// newer than the member's last-read timestamp). DM channels get their
    /// name swapped for the other participant's display name.
    pub fn get_channels_for_user(&self, user_id: &str) -> Result<Vec<ChannelWithUnread>> {
        let mut channels = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, COALESCE(c.description, ''), c.is_direct, c.created_by, c.created_at,
                        (SELECT COUNT(*) FROM messages m
                         WHERE m.channel_id = c.id
                           AND m.thread_id IS NULL
                           AND m.created_at > cm.last_read_at) AS unread_count
                 FROM channels c
                 JOIN channel_members cm ON c.id = cm.channel_id
                 WHERE cm.user_id = ?1
                 ORDER BY c.name",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ChannelWithUnread {
                        channel: channel_from_row(row)?,
                        unread_count: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        for entry in channels.iter_mut() {
            if entry.channel.is_direct {
                if let Some(other) = self.get_dm_other_participant(&entry.channel.id, user_id)? {
                    entry.channel.name = other.display_name;
                }
            }
        }

        Ok(channels)
    }

    pub fn get_dm_other_participant(
        &self,
        channel_id: &str,
        current_user_id: &str,
    ) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.display_name, u.password_hash,
                        u.avatar_url, u.status, u.created_at
                 FROM users u
                 JOIN channel_members cm ON u.id = cm.user_id
                 WHERE cm.channel_id = ?1 AND u.id != ?2
                 LIMIT 1",
            )?;
            Ok(stmt
                .query_row(params![channel_id, current_user_id], |row| {
                    user_from_row(row, 0)
                })
                .optional()?)
        })
    }

    pub fn get_public_channels(&self) -> Result<Vec<Channel>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHANNEL_COLS} FROM channels WHERE is_direct = 0 ORDER BY name"
            ))?;
            let rows = stmt
                .query_map([], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn join_channel(&self, channel_id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| join_channel_inner(conn, channel_id, user_id))
    }

    pub fn leave_channel(&self, channel_id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                params![channel_id, user_id],
            )?;
            Ok(())
        })
    }

    pub fn get_channel_members(&self, channel_id: &str) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.display_name, u.password_hash,
                        u.avatar_url, u.status, u.created_at
                 FROM users u
                 JOIN channel_members cm ON u.id = cm.user_id
                 WHERE cm.channel_id = ?1",
            )?;
            let rows = stmt
                .query_map([channel_id], |row| user_from_row(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_channel_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                params![channel_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Repeated "open DM with X" requests converge on the existing channel.
    pub fn get_or_create_dm_channel(&self, user1_id: &str, user2_id: &str) -> Result<Channel> {
        let existing: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT c.id FROM channels c
                     JOIN channel_members cm1 ON c.id = cm1.channel_id AND cm1.user_id = ?1
                     JOIN channel_members cm2 ON c.id = cm2.channel_id AND cm2.user_id = ?2
                     WHERE c.is_direct = 1",
                    params![user1_id, user2_id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        if let Some(id) = existing {
            if let Some(channel) = self.get_channel(&id)? {
                return Ok(channel);
            }
        }

        let short1: String = user1_id.chars().take(8).collect();
        let short2: String = user2_id.chars().take(8).collect();
        let mut channel =
            self.create_channel(&format!("dm-{short1}-{short2}"), "", user1_id, true)?;
        self.join_channel(&channel.id, user2_id)?;

        if let Some(other) = self.get_user_by_id(user2_id)? {
            channel.name = other.display_name;
        }
        Ok(channel)
    }

    /// DM between the system user and a recipient, created on first use.
    pub fn get_or_create_smackbot_dm(&self, user_id: &str) -> Result<Channel> {
        let smackbot = self
            .get_smackbot()?
            .ok_or_else(|| anyhow::anyhow!("smackbot user missing"))?;
        self.get_or_create_dm_channel(&smackbot.id, user_id)
    }

    /// Advances the member's last-read timestamp. Never moves it backwards.
    pub fn mark_channel_read(&self, channel_id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE channel_members SET last_read_at = ?1
                 WHERE channel_id = ?2 AND user_id = ?3 AND last_read_at < ?1",
                params![now_ts(), channel_id, user_id],
            )?;
            Ok(())
        })
    }

    // -- Mutes --

    pub fn mute_channel(&self, user_id: &str, channel_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO muted_channels (user_id, channel_id, muted_at)
                 VALUES (?1, ?2, ?3)",
                params![user_id, channel_id, now_ts()],
            )?;
            Ok(())
        })
    }

    pub fn unmute_channel(&self, user_id: &str, channel_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM muted_channels WHERE user_id = ?1 AND channel_id = ?2",
                params![user_id, channel_id],
            )?;
            Ok(())
        })
    }

    pub fn get_muted_channels(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT channel_id FROM muted_channels WHERE user_id = ?1")?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
