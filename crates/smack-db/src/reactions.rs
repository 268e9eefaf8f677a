use anyhow::Result;
use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use smack_types::models::{Reaction, ReactionGroup};

use crate::users::user_from_row;
use crate::{format_ts, Database};

impl Database {
    /// Uniqueness on (message, user, emoji) is enforced by the schema; a
    /// duplicate add is a no-op.
    pub fn add_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<Reaction> {
        let reaction = Reaction {
            id: Uuid::new_v4().to_string(),
            message_id: message_id.to_string(),
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO reactions (id, message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    reaction.id,
                    reaction.message_id,
                    reaction.user_id,
                    reaction.emoji,
                    format_ts(reaction.created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(reaction)
    }

    pub fn remove_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                params![message_id, user_id, emoji],
            )?;
            Ok(())
        })
    }

    /// Reactions on one message grouped per emoji, users in reaction order.
    pub fn get_reactions_for_message(&self, message_id: &str) -> Result<Vec<ReactionGroup>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.emoji, u.id, u.username, u.display_name, u.password_hash,
                        u.avatar_url, u.status, u.created_at
                 FROM reactions r
                 JOIN users u ON r.user_id = u.id
                 WHERE r.message_id = ?1
                 ORDER BY r.emoji, r.created_at",
            )?;

            let mut groups: Vec<ReactionGroup> = Vec::new();
            let rows = stmt.query_map([message_id], |row| {
                let emoji: String = row.get(0)?;
                let user = user_from_row(row, 1)?;
                Ok((emoji, user))
            })?;

            for row in rows {
                let (emoji, user) = row?;
                match groups.last_mut() {
                    Some(group) if group.emoji == emoji => {
                        group.count += 1;
                        group.users.push(user.to_response());
                    }
                    _ => groups.push(ReactionGroup {
                        emoji,
                        count: 1,
                        users: vec![user.to_response()],
                    }),
                }
            }

            Ok(groups)
        })
    }
}
