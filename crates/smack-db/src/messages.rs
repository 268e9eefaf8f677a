use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use smack_types::models::{Message, MessageWithUser};

use crate::users::user_from_row;
use crate::{format_ts, parse_ts, Database};

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        html_content: row.get(4)?,
        widget_size: row.get(5)?,
        thread_id: row.get(6)?,
        created_at: parse_ts(&row.get::<_, String>(7)?),
    })
}

impl Database {
    pub fn create_message(
        &self,
        channel_id: &str,
        user_id: &str,
        content: &str,
        thread_id: Option<&str>,
    ) -> Result<Message> {
        self.create_message_with_html(channel_id, user_id, content, None, None, thread_id)
    }

    pub fn create_message_with_html(
        &self,
        channel_id: &str,
        user_id: &str,
        content: &str,
        html_content: Option<&str>,
        widget_size: Option<&str>,
        thread_id: Option<&str>,
    ) -> Result<Message> {
        let msg = Message {
            id: Uuid::new_v4().to_string(),
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            html_content: html_content.map(str::to_string),
            widget_size: widget_size.map(str::to_string),
            thread_id: thread_id.map(str::to_string),
            created_at: Utc::now(),
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, channel_id, user_id, content, html_content, widget_size, thread_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    msg.id,
                    msg.channel_id,
                    msg.user_id,
                    msg.content,
                    msg.html_content,
                    msg.widget_size,
                    msg.thread_id,
                    format_ts(msg.created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(msg)
    }

    pub fn update_message_content(&self, message_id: &str, content: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET content = ?1 WHERE id = ?2",
                params![content, message_id],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, channel_id, user_id, content, html_content, widget_size, thread_id, created_at
                 FROM messages WHERE id = ?1",
            )?;
            Ok(stmt.query_row([id], message_from_row).optional()?)
        })
    }

    /// Newest-first window of `limit` top-level messages, returned in
    /// chronological order, joined with the author and per-message reply
    /// stats.
    pub fn get_channel_messages(
        &self,
        channel_id: &str,
        limit: i64,
    ) -> Result<Vec<MessageWithUser>> {
        self.get_channel_messages_before(channel_id, limit, None)
    }

    pub fn get_channel_messages_before(
        &self,
        channel_id: &str,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageWithUser>> {
        let mut messages = self.with_conn(|conn| {
            let sql = format!(
                "SELECT m.id, m.channel_id, m.user_id, m.content, m.html_content, m.widget_size, m.thread_id, m.created_at,
                        u.id, u.username, u.display_name, u.password_hash, u.avatar_url, u.status, u.created_at,
                        (SELECT COUNT(*) FROM messages WHERE thread_id = m.id) AS reply_count,
                        (SELECT MAX(created_at) FROM messages WHERE thread_id = m.id) AS latest_reply
                 FROM messages m
                 JOIN users u ON m.user_id = u.id
                 WHERE m.channel_id = ?1 AND m.thread_id IS NULL{}
                 ORDER BY m.created_at DESC
                 LIMIT ?2",
                if before.is_some() {
                    " AND m.created_at < ?3"
                } else {
                    ""
                }
            );
            let mut stmt = conn.prepare(&sql)?;

            let map_row = |row: &Row| -> rusqlite::Result<MessageWithUser> {
                let user = user_from_row(row, 8)?;
                Ok(MessageWithUser {
                    message: message_from_row(row)?,
                    user: user.to_response(),
                    reply_count: row.get(15)?,
                    latest_reply: row
                        .get::<_, Option<String>>(16)?
                        .map(|s| parse_ts(&s)),
                })
            };

            let rows = match before {
                Some(cursor) => stmt
                    .query_map(params![channel_id, limit, format_ts(cursor)], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map(params![channel_id, limit], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })?;

        messages.reverse();
        Ok(messages)
    }

    /// The parent plus all its replies, in chronological order.
    pub fn get_thread_messages(&self, thread_id: &str) -> Result<Vec<MessageWithUser>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.channel_id, m.user_id, m.content, m.html_content, m.widget_size, m.thread_id, m.created_at,
                        u.id, u.username, u.display_name, u.password_hash, u.avatar_url, u.status, u.created_at
                 FROM messages m
                 JOIN users u ON m.user_id = u.id
                 WHERE m.id = ?1 OR m.thread_id = ?1
                 ORDER BY m.created_at ASC",
            )?;
            let rows = stmt
                .query_map([thread_id], |row| {
                    let user = user_from_row(row, 8)?;
                    Ok(MessageWithUser {
                        message: message_from_row(row)?,
                        user: user.to_response(),
                        reply_count: 0,
                        latest_reply: None,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Deletes a message, its replies, and every reaction on any of them in
    /// one transaction.
    pub fn delete_message(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1
                 OR message_id IN (SELECT id FROM messages WHERE thread_id = ?1)",
                [id],
            )?;
            tx.execute("DELETE FROM messages WHERE thread_id = ?1", [id])?;
            tx.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn clear_channel_messages(&self, channel_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM reactions WHERE message_id IN
                 (SELECT id FROM messages WHERE channel_id = ?1)",
                [channel_id],
            )?;
            tx.execute("DELETE FROM messages WHERE channel_id = ?1", [channel_id])?;
            tx.commit()?;
            Ok(())
        })
    }
}
