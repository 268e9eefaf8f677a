use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use smack_types::models::{App, AppMember, AppMessage, AppWithDetails};

use crate::users::user_from_row;
use crate::{format_ts, now_ts, parse_ts, Database};

fn app_from_row(row: &Row) -> rusqlite::Result<App> {
    Ok(App {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        icon: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        html_content: row.get(4)?,
        css_content: row.get(5)?,
        js_content: row.get(6)?,
        created_by: row.get(7)?,
        created_at: parse_ts(&row.get::<_, String>(8)?),
        updated_at: parse_ts(&row.get::<_, String>(9)?),
    })
}

const APP_COLS: &str =
    "id, name, description, icon, html_content, css_content, js_content, created_by, created_at, updated_at";

impl Database {
    pub fn create_app(
        &self,
        name: &str,
        description: &str,
        icon: &str,
        created_by: &str,
    ) -> Result<App> {
        let now = Utc::now();
        let app = App {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
            html_content: String::new(),
            css_content: String::new(),
            js_content: String::new(),
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO apps (id, name, description, icon, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    app.id,
                    app.name,
                    app.description,
                    app.icon,
                    app.created_by,
                    format_ts(now),
                ],
            )?;
            // Exactly one owner per app, assigned at creation.
            tx.execute(
                "INSERT INTO app_members (app_id, user_id, role, joined_at)
                 VALUES (?1, ?2, 'owner', ?3)",
                params![app.id, app.created_by, format_ts(now)],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        Ok(app)
    }

    pub fn get_app(&self, id: &str) -> Result<Option<App>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {APP_COLS} FROM apps WHERE id = ?1"))?;
            Ok(stmt.query_row([id], app_from_row).optional()?)
        })
    }

    pub fn get_apps_for_user(&self, user_id: &str) -> Result<Vec<AppWithDetails>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.name, a.description, a.icon, a.html_content, a.css_content,
                        a.js_content, a.created_by, a.created_at, a.updated_at,
                        (SELECT COUNT(*) FROM app_members WHERE app_id = a.id)
                 FROM apps a
                 JOIN app_members am ON a.id = am.app_id
                 WHERE am.user_id = ?1
                 ORDER BY a.updated_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(AppWithDetails {
                        app: app_from_row(row)?,
                        member_count: row.get(10)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_app(&self, id: &str, name: &str, description: &str, icon: Option<&str>) -> Result<()> {
        self.with_conn_mut(|conn| {
            match icon {
                Some(icon) => conn.execute(
                    "UPDATE apps SET name = ?1, description = ?2, icon = ?3, updated_at = ?4 WHERE id = ?5",
                    params![name, description, icon, now_ts(), id],
                )?,
                None => conn.execute(
                    "UPDATE apps SET name = ?1, description = ?2, updated_at = ?3 WHERE id = ?4",
                    params![name, description, now_ts(), id],
                )?,
            };
            Ok(())
        })
    }

    pub fn update_app_code(&self, id: &str, html: &str, css: &str, js: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE apps SET html_content = ?1, css_content = ?2, js_content = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![html, css, js, now_ts(), id],
            )?;
            Ok(())
        })
    }

    pub fn delete_app(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM apps WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Membership --

    pub fn add_app_member(&self, app_id: &str, user_id: &str, role: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO app_members (app_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![app_id, user_id, role, now_ts()],
            )?;
            Ok(())
        })
    }

    pub fn remove_app_member(&self, app_id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM app_members WHERE app_id = ?1 AND user_id = ?2",
                params![app_id, user_id],
            )?;
            Ok(())
        })
    }

    pub fn get_app_members(&self, app_id: &str) -> Result<Vec<AppMember>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT am.app_id, am.user_id, am.role, am.joined_at,
                        u.id, u.username, u.display_name, u.password_hash,
                        u.avatar_url, u.status, u.created_at
                 FROM app_members am
                 JOIN users u ON am.user_id = u.id
                 WHERE am.app_id = ?1",
            )?;
            let rows = stmt
                .query_map([app_id], |row| {
                    let user = user_from_row(row, 4)?;
                    Ok(AppMember {
                        app_id: row.get(0)?,
                        user_id: row.get(1)?,
                        role: row.get(2)?,
                        joined_at: parse_ts(&row.get::<_, String>(3)?),
                        user: user.to_response(),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_app_member_role(&self, app_id: &str, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT role FROM app_members WHERE app_id = ?1 AND user_id = ?2",
                    params![app_id, user_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    pub fn is_app_member(&self, app_id: &str, user_id: &str) -> Result<bool> {
        Ok(self.get_app_member_role(app_id, user_id)?.is_some())
    }

    // -- Builder conversation history --

    pub fn create_app_message(
        &self,
        app_id: &str,
        user_id: &str,
        role: &str,
        content: &str,
    ) -> Result<AppMessage> {
        let msg = AppMessage {
            id: Uuid::new_v4().to_string(),
            app_id: app_id.to_string(),
            user_id: user_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO app_messages (id, app_id, user_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    msg.id,
                    msg.app_id,
                    msg.user_id,
                    msg.role,
                    msg.content,
                    format_ts(msg.created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(msg)
    }

    /// Newest-first window of `limit` turns, returned chronologically.
    pub fn get_app_messages(&self, app_id: &str, limit: i64) -> Result<Vec<AppMessage>> {
        let mut messages = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, app_id, user_id, role, content, created_at
                 FROM app_messages
                 WHERE app_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![app_id, limit], |row| {
                    Ok(AppMessage {
                        id: row.get(0)?,
                        app_id: row.get(1)?,
                        user_id: row.get(2)?,
                        role: row.get(3)?,
                        content: row.get(4)?,
                        created_at: parse_ts(&row.get::<_, String>(5)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        messages.reverse();
        Ok(messages)
    }
}
