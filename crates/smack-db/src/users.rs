use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use smack_types::models::{User, UserPreference};

use crate::{format_ts, now_ts, parse_ts, Database};

pub(crate) fn user_from_row(row: &Row, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(offset)?,
        username: row.get(offset + 1)?,
        display_name: row.get(offset + 2)?,
        password_hash: row.get(offset + 3)?,
        avatar_url: row.get::<_, Option<String>>(offset + 4)?.unwrap_or_default(),
        status: row.get(offset + 5)?,
        created_at: parse_ts(&row.get::<_, String>(offset + 6)?),
    })
}

const USER_COLS: &str = "id, username, display_name, password_hash, avatar_url, status, created_at";

impl Database {
    /// Creates a user and auto-joins them to the general channel. The
    /// password hash is produced by the caller so hashing stays off this
    /// crate's lock.
    pub fn create_user(
        &self,
        username: &str,
        display_name: &str,
        password_hash: &str,
    ) -> Result<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            display_name: display_name.to_string(),
            password_hash: password_hash.to_string(),
            avatar_url: String::new(),
            status: "online".into(),
            created_at: Utc::now(),
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, display_name, password_hash, avatar_url, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, '', ?5, ?6)",
                params![
                    user.id,
                    user.username,
                    user.display_name,
                    user.password_hash,
                    user.status,
                    format_ts(user.created_at),
                ],
            )?;

            let general: Option<String> = conn
                .query_row("SELECT id FROM channels WHERE name = 'general'", [], |r| {
                    r.get(0)
                })
                .optional()?;
            if let Some(general_id) = general {
                join_channel_inner(conn, &general_id, &user.id)?;
            }
            Ok(())
        })?;

        Ok(user)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLS} FROM users WHERE username = ?1"))?;
            Ok(stmt
                .query_row([username], |row| user_from_row(row, 0))
                .optional()?)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {USER_COLS} FROM users WHERE id = ?1"))?;
            Ok(stmt.query_row([id], |row| user_from_row(row, 0)).optional()?)
        })
    }

    pub fn get_all_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLS} FROM users ORDER BY username"))?;
            let rows = stmt
                .query_map([], |row| user_from_row(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_user_status(&self, user_id: &str, status: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET status = ?1 WHERE id = ?2",
                params![status, user_id],
            )?;
            Ok(())
        })
    }

    pub fn update_user_avatar(&self, user_id: &str, avatar_url: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET avatar_url = ?1 WHERE id = ?2",
                params![avatar_url, user_id],
            )?;
            Ok(())
        })
    }

    pub fn update_user_display_name(&self, user_id: &str, display_name: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET display_name = ?1 WHERE id = ?2",
                params![display_name, user_id],
            )?;
            Ok(())
        })
    }

    /// Idempotent upsert of a non-loginable user row (empty password hash)
    /// so bots and webhook posters satisfy the author foreign key.
    pub fn ensure_bot_user(
        &self,
        id: &str,
        username: &str,
        display_name: &str,
        avatar_url: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO users (id, username, display_name, password_hash, avatar_url, status, created_at)
                 VALUES (?1, ?2, ?3, '', ?4, 'online', ?5)",
                params![id, username, display_name, avatar_url, now_ts()],
            )?;
            Ok(())
        })
    }

    pub fn get_smackbot(&self) -> Result<Option<User>> {
        self.get_user_by_username("smackbot")
    }

    // -- Preferences --

    pub fn get_user_preference(&self, user_id: &str, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM user_preferences WHERE user_id = ?1 AND key = ?2",
                    params![user_id, key],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    pub fn get_all_user_preferences(&self, user_id: &str) -> Result<Vec<UserPreference>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT key, value FROM user_preferences WHERE user_id = ?1")?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(UserPreference {
                        key: row.get(0)?,
                        value: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_user_preference(&self, user_id: &str, key: &str, value: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO user_preferences (user_id, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![user_id, key, value, now_ts()],
            )?;
            Ok(())
        })
    }

    pub fn delete_user_preference(&self, user_id: &str, key: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM user_preferences WHERE user_id = ?1 AND key = ?2",
                params![user_id, key],
            )?;
            Ok(())
        })
    }

    // -- Server settings --

    pub fn get_server_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM server_settings WHERE key = ?1",
                    [key],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    pub fn set_server_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO server_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now_ts()],
            )?;
            Ok(())
        })
    }
}

pub(crate) fn join_channel_inner(conn: &Connection, channel_id: &str, user_id: &str) -> Result<()> {
    let now = now_ts();
    conn.execute(
        "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at, last_read_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![channel_id, user_id, now],
    )?;
    Ok(())
}
