use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use smack_types::api::UpdateCommandRequest;
use smack_types::models::CustomCommand;

use crate::{format_ts, now_ts, parse_ts, Database};

fn command_from_row(row: &Row) -> rusqlite::Result<CustomCommand> {
    Ok(CustomCommand {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        url: row.get(3)?,
        method: row.get(4)?,
        headers: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        body_template: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        is_global: row.get(7)?,
        created_by: row.get(8)?,
        response_mode: row.get(9)?,
        enabled: row.get(10)?,
        created_at: parse_ts(&row.get::<_, String>(11)?),
        updated_at: parse_ts(&row.get::<_, String>(12)?),
    })
}

const COMMAND_COLS: &str = "id, name, description, url, method, headers, body_template, is_global, created_by, response_mode, enabled, created_at, updated_at";

impl Database {
    #[allow(clippy::too_many_arguments)]
    pub fn create_command(
        &self,
        name: &str,
        description: &str,
        url: &str,
        method: &str,
        headers: &str,
        body_template: &str,
        response_mode: &str,
        created_by: &str,
        is_global: bool,
    ) -> Result<CustomCommand> {
        let now = Utc::now();
        let cmd = CustomCommand {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            url: url.to_string(),
            method: if method.is_empty() { "GET" } else { method }.to_string(),
            headers: headers.to_string(),
            body_template: body_template.to_string(),
            is_global,
            created_by: created_by.to_string(),
            response_mode: if response_mode.is_empty() {
                "private"
            } else {
                response_mode
            }
            .to_string(),
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO custom_commands (id, name, description, url, method, headers, body_template, is_global, created_by, response_mode, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?11)",
                params![
                    cmd.id,
                    cmd.name,
                    cmd.description,
                    cmd.url,
                    cmd.method,
                    cmd.headers,
                    cmd.body_template,
                    cmd.is_global,
                    cmd.created_by,
                    cmd.response_mode,
                    format_ts(now),
                ],
            )?;
            Ok(())
        })?;

        Ok(cmd)
    }

    pub fn get_command(&self, id: &str) -> Result<Option<CustomCommand>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMAND_COLS} FROM custom_commands WHERE id = ?1"
            ))?;
            Ok(stmt.query_row([id], command_from_row).optional()?)
        })
    }

    /// Resolves a command by name for a user: a private match (created by
    /// the user) wins over a global one; disabled rows never resolve.
    pub fn get_command_by_name(&self, name: &str, user_id: &str) -> Result<Option<CustomCommand>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMAND_COLS} FROM custom_commands
                 WHERE name = ?1
                   AND ((is_global = 0 AND created_by = ?2) OR is_global = 1)
                   AND enabled = 1
                 ORDER BY is_global ASC
                 LIMIT 1"
            ))?;
            Ok(stmt
                .query_row(params![name, user_id], command_from_row)
                .optional()?)
        })
    }

    pub fn get_commands_for_user(&self, user_id: &str) -> Result<Vec<CustomCommand>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMAND_COLS} FROM custom_commands
                 WHERE (is_global = 1 OR created_by = ?1) AND enabled = 1
                 ORDER BY name"
            ))?;
            let rows = stmt
                .query_map([user_id], command_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_command(&self, id: &str, req: &UpdateCommandRequest) -> Result<()> {
        let mut updates: Vec<&str> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(name) = &req.name {
            updates.push("name = ?");
            args.push(Box::new(name.clone()));
        }
        if let Some(description) = &req.description {
            updates.push("description = ?");
            args.push(Box::new(description.clone()));
        }
        if let Some(url) = &req.url {
            updates.push("url = ?");
            args.push(Box::new(url.clone()));
        }
        if let Some(method) = &req.method {
            updates.push("method = ?");
            args.push(Box::new(method.clone()));
        }
        if let Some(headers) = &req.headers {
            updates.push("headers = ?");
            args.push(Box::new(headers.clone()));
        }
        if let Some(body_template) = &req.body_template {
            updates.push("body_template = ?");
            args.push(Box::new(body_template.clone()));
        }
        if let Some(is_global) = req.is_global {
            updates.push("is_global = ?");
            args.push(Box::new(is_global));
        }
        if let Some(response_mode) = &req.response_mode {
            updates.push("response_mode = ?");
            args.push(Box::new(response_mode.clone()));
        }
        if let Some(enabled) = req.enabled {
            updates.push("enabled = ?");
            args.push(Box::new(enabled));
        }

        if updates.is_empty() {
            return Ok(());
        }

        updates.push("updated_at = ?");
        args.push(Box::new(now_ts()));
        args.push(Box::new(id.to_string()));

        let sql = format!(
            "UPDATE custom_commands SET {} WHERE id = ?",
            updates.join(", ")
        );

        self.with_conn_mut(|conn| {
            conn.execute(&sql, rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())))?;
            Ok(())
        })
    }

    pub fn delete_command(&self, id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM custom_commands WHERE id = ?1 AND created_by = ?2",
                params![id, user_id],
            )?;
            Ok(())
        })
    }
}
