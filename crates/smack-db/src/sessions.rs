use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::{format_ts, now_ts, Database};

impl Database {
    /// Stores a freshly minted opaque bearer token.
    pub fn create_session(
        &self,
        token: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO sessions (token, user_id, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![token, user_id, format_ts(expires_at), now_ts()],
            )?;
            Ok(())
        })
    }

    /// Resolves a token to its user id. Expired rows fail validation and are
    /// deleted opportunistically.
    pub fn get_session_user(&self, token: &str) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT user_id, expires_at FROM sessions WHERE token = ?1",
                    [token],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((user_id, expires_at)) if expires_at > now_ts() => Ok(Some(user_id)),
                Some(_) => {
                    conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    pub fn delete_expired_sessions(&self) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now_ts()])?;
            Ok(())
        })
    }
}
