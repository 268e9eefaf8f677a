use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use smack_types::models::{
    Board, BoardMember, BoardWithDetails, CardWithDetails, ColumnWithCards, KanbanCard,
    KanbanColumn, KanbanComment, KanbanLabel, UserResponse,
};

use crate::users::user_from_row;
use crate::{format_ts, now_ts, parse_ts, Database};

fn board_from_row(row: &Row) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        icon: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        created_by: row.get(4)?,
        created_at: parse_ts(&row.get::<_, String>(5)?),
        updated_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

fn column_from_row(row: &Row) -> rusqlite::Result<KanbanColumn> {
    Ok(KanbanColumn {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        position: row.get(3)?,
        created_at: parse_ts(&row.get::<_, String>(4)?),
    })
}

fn label_from_row(row: &Row) -> rusqlite::Result<KanbanLabel> {
    Ok(KanbanLabel {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
        created_at: parse_ts(&row.get::<_, String>(4)?),
    })
}

fn card_from_row(row: &Row) -> rusqlite::Result<KanbanCard> {
    Ok(KanbanCard {
        id: row.get(0)?,
        column_id: row.get(1)?,
        board_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        position: row.get(5)?,
        due_date: row.get::<_, Option<String>>(6)?.map(|s| parse_ts(&s)),
        created_by: row.get(7)?,
        created_at: parse_ts(&row.get::<_, String>(8)?),
        updated_at: parse_ts(&row.get::<_, String>(9)?),
    })
}

const BOARD_COLS: &str = "id, name, description, icon, created_by, created_at, updated_at";
const CARD_COLS: &str =
    "id, column_id, board_id, title, description, position, due_date, created_by, created_at, updated_at";

impl Database {
    // -- Boards --

    pub fn create_board(
        &self,
        name: &str,
        description: &str,
        icon: &str,
        created_by: &str,
    ) -> Result<Board> {
        let now = Utc::now();
        let board = Board {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO kanban_boards (id, name, description, icon, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    board.id,
                    board.name,
                    board.description,
                    board.icon,
                    board.created_by,
                    format_ts(now),
                ],
            )?;
            // Exactly one owner per board, assigned at creation.
            tx.execute(
                "INSERT INTO kanban_board_members (board_id, user_id, role, joined_at)
                 VALUES (?1, ?2, 'owner', ?3)",
                params![board.id, board.created_by, format_ts(now)],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        Ok(board)
    }

    pub fn get_board(&self, id: &str) -> Result<Option<Board>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {BOARD_COLS} FROM kanban_boards WHERE id = ?1"))?;
            Ok(stmt.query_row([id], board_from_row).optional()?)
        })
    }

    pub fn get_boards_for_user(&self, user_id: &str) -> Result<Vec<BoardWithDetails>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT b.id, b.name, b.description, b.icon, b.created_by, b.created_at, b.updated_at,
                        (SELECT COUNT(*) FROM kanban_columns WHERE board_id = b.id),
                        (SELECT COUNT(*) FROM kanban_cards WHERE board_id = b.id),
                        (SELECT COUNT(*) FROM kanban_board_members WHERE board_id = b.id)
                 FROM kanban_boards b
                 JOIN kanban_board_members bm ON b.id = bm.board_id
                 WHERE bm.user_id = ?1
                 ORDER BY b.updated_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(BoardWithDetails {
                        board: board_from_row(row)?,
                        column_count: row.get(7)?,
                        card_count: row.get(8)?,
                        member_count: row.get(9)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_board(
        &self,
        id: &str,
        name: &str,
        description: &str,
        icon: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            match icon {
                Some(icon) => conn.execute(
                    "UPDATE kanban_boards SET name = ?1, description = ?2, icon = ?3, updated_at = ?4 WHERE id = ?5",
                    params![name, description, icon, now_ts(), id],
                )?,
                None => conn.execute(
                    "UPDATE kanban_boards SET name = ?1, description = ?2, updated_at = ?3 WHERE id = ?4",
                    params![name, description, now_ts(), id],
                )?,
            };
            Ok(())
        })
    }

    pub fn delete_board(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM kanban_boards WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Board members --

    pub fn add_board_member(&self, board_id: &str, user_id: &str, role: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kanban_board_members (board_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![board_id, user_id, role, now_ts()],
            )?;
            Ok(())
        })
    }

    pub fn remove_board_member(&self, board_id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM kanban_board_members WHERE board_id = ?1 AND user_id = ?2",
                params![board_id, user_id],
            )?;
            Ok(())
        })
    }

    pub fn get_board_members(&self, board_id: &str) -> Result<Vec<BoardMember>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT bm.board_id, bm.user_id, bm.role, bm.joined_at,
                        u.id, u.username, u.display_name, u.password_hash,
                        u.avatar_url, u.status, u.created_at
                 FROM kanban_board_members bm
                 JOIN users u ON bm.user_id = u.id
                 WHERE bm.board_id = ?1",
            )?;
            let rows = stmt
                .query_map([board_id], |row| {
                    let user = user_from_row(row, 4)?;
                    Ok(BoardMember {
                        board_id: row.get(0)?,
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

    pub fn get_board_member_role(&self, board_id: &str, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT role FROM kanban_board_members WHERE board_id = ?1 AND user_id = ?2",
                    params![board_id, user_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    pub fn is_board_member(&self, board_id: &str, user_id: &str) -> Result<bool> {
        Ok(self.get_board_member_role(board_id, user_id)?.is_some())
    }

    // -- Columns --

    pub fn create_column(
        &self,
        board_id: &str,
        name: &str,
        position: Option<i64>,
    ) -> Result<KanbanColumn> {
        let column = self.with_conn_mut(|conn| {
            let position = match position {
                Some(p) => p,
                None => {
                    let max: i64 = conn.query_row(
                        "SELECT COALESCE(MAX(position), -1) FROM kanban_columns WHERE board_id = ?1",
                        [board_id],
                        |row| row.get(0),
                    )?;
                    max + 1
                }
            };

            let column = KanbanColumn {
                id: Uuid::new_v4().to_string(),
                board_id: board_id.to_string(),
                name: name.to_string(),
                position,
                created_at: Utc::now(),
            };
            conn.execute(
                "INSERT INTO kanban_columns (id, board_id, name, position, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    column.id,
                    column.board_id,
                    column.name,
                    column.position,
                    format_ts(column.created_at),
                ],
            )?;
            Ok(column)
        })?;

        Ok(column)
    }

    pub fn get_column(&self, id: &str) -> Result<Option<KanbanColumn>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, board_id, name, position, created_at FROM kanban_columns WHERE id = ?1",
            )?;
            Ok(stmt.query_row([id], column_from_row).optional()?)
        })
    }

    pub fn update_column(&self, id: &str, name: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE kanban_columns SET name = ?1 WHERE id = ?2",
                params![name, id],
            )?;
            Ok(())
        })
    }

    pub fn delete_column(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM kanban_columns WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    /// Rewrites every column position in one transaction; any failure rolls
    /// the whole reorder back.
    pub fn reorder_columns(&self, board_id: &str, column_ids: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            for (i, column_id) in column_ids.iter().enumerate() {
                tx.execute(
                    "UPDATE kanban_columns SET position = ?1 WHERE id = ?2 AND board_id = ?3",
                    params![i as i64, column_id, board_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_columns_with_cards(&self, board_id: &str) -> Result<Vec<ColumnWithCards>> {
        let columns = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, board_id, name, position, created_at
                 FROM kanban_columns WHERE board_id = ?1 ORDER BY position",
            )?;
            let rows = stmt
                .query_map([board_id], column_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut result = Vec::with_capacity(columns.len());
        for column in columns {
            let cards = self.get_cards_for_column(&column.id)?;
            result.push(ColumnWithCards { column, cards });
        }
        Ok(result)
    }

    // -- Cards --

    pub fn create_card(
        &self,
        column_id: &str,
        board_id: &str,
        title: &str,
        description: &str,
        created_by: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<KanbanCard> {
        let card = self.with_conn_mut(|conn| {
            let max: i64 = conn.query_row(
                "SELECT COALESCE(MAX(position), -1) FROM kanban_cards WHERE column_id = ?1",
                [column_id],
                |row| row.get(0),
            )?;

            let now = Utc::now();
            let card = KanbanCard {
                id: Uuid::new_v4().to_string(),
                column_id: column_id.to_string(),
                board_id: board_id.to_string(),
                title: title.to_string(),
                description: description.to_string(),
                position: max + 1,
                due_date,
                created_by: created_by.to_string(),
                created_at: now,
                updated_at: now,
            };

            conn.execute(
                "INSERT INTO kanban_cards (id, column_id, board_id, title, description, position, due_date, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    card.id,
                    card.column_id,
                    card.board_id,
                    card.title,
                    card.description,
                    card.position,
                    card.due_date.map(format_ts),
                    card.created_by,
                    format_ts(now),
                ],
            )?;
            conn.execute(
                "UPDATE kanban_boards SET updated_at = ?1 WHERE id = ?2",
                params![format_ts(now), board_id],
            )?;
            Ok(card)
        })?;

        Ok(card)
    }

    pub fn get_card(&self, id: &str) -> Result<Option<KanbanCard>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {CARD_COLS} FROM kanban_cards WHERE id = ?1"))?;
            Ok(stmt.query_row([id], card_from_row).optional()?)
        })
    }

    /// The cards-with-assignees-and-labels join for a single card.
    pub fn get_card_with_details(&self, id: &str) -> Result<Option<CardWithDetails>> {
        let Some(card) = self.get_card(id)? else {
            return Ok(None);
        };

        let assignees = self.get_card_assignees(id)?;
        let labels = self.get_card_labels(id)?;
        let comment_count = self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM kanban_comments WHERE card_id = ?1",
                [id],
                |row| row.get(0),
            )?;
            Ok(count)
        })?;
        let creator = self
            .get_user_by_id(&card.created_by)?
            .map(|u| u.to_response());

        Ok(Some(CardWithDetails {
            card,
            assignees,
            labels,
            comment_count,
            creator,
        }))
    }

    pub fn get_cards_for_column(&self, column_id: &str) -> Result<Vec<CardWithDetails>> {
        let cards = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CARD_COLS},
                        (SELECT COUNT(*) FROM kanban_comments WHERE card_id = kanban_cards.id)
                 FROM kanban_cards WHERE column_id = ?1 ORDER BY position"
            ))?;
            let rows = stmt
                .query_map([column_id], |row| {
                    Ok((card_from_row(row)?, row.get::<_, i64>(10)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut result = Vec::with_capacity(cards.len());
        for (card, comment_count) in cards {
            let assignees = self.get_card_assignees(&card.id)?;
            let labels = self.get_card_labels(&card.id)?;
            result.push(CardWithDetails {
                card,
                assignees,
                labels,
                comment_count,
                creator: None,
            });
        }
        Ok(result)
    }

    pub fn update_card(
        &self,
        id: &str,
        title: &str,
        description: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE kanban_cards SET title = ?1, description = ?2, due_date = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![title, description, due_date.map(format_ts), now_ts(), id],
            )?;
            Ok(())
        })
    }

    pub fn delete_card(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM kanban_cards WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    /// Moves a card into a column slot and shifts the cards below it down,
    /// atomically. Positions in the source column are not compacted; readers
    /// order by position, so gaps are harmless.
    pub fn move_card(&self, card_id: &str, target_column_id: &str, position: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "UPDATE kanban_cards SET column_id = ?1, position = ?2, updated_at = ?3 WHERE id = ?4",
                params![target_column_id, position, now_ts(), card_id],
            )?;
            tx.execute(
                "UPDATE kanban_cards SET position = position + 1
                 WHERE column_id = ?1 AND id != ?2 AND position >= ?3",
                params![target_column_id, card_id, position],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    // -- Assignees / labels --

    pub fn set_card_assignees(&self, card_id: &str, user_ids: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM kanban_card_assignees WHERE card_id = ?1",
                [card_id],
            )?;
            for user_id in user_ids {
                tx.execute(
                    "INSERT INTO kanban_card_assignees (card_id, user_id, assigned_at)
                     VALUES (?1, ?2, ?3)",
                    params![card_id, user_id, now_ts()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_card_assignees(&self, card_id: &str) -> Result<Vec<UserResponse>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.display_name, u.password_hash,
                        u.avatar_url, u.status, u.created_at
                 FROM users u
                 JOIN kanban_card_assignees ca ON u.id = ca.user_id
                 WHERE ca.card_id = ?1",
            )?;
            let rows = stmt
                .query_map([card_id], |row| {
                    Ok(user_from_row(row, 0)?.to_response())
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_card_labels(&self, card_id: &str, label_ids: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM kanban_card_labels WHERE card_id = ?1",
                [card_id],
            )?;
            for label_id in label_ids {
                tx.execute(
                    "INSERT INTO kanban_card_labels (card_id, label_id) VALUES (?1, ?2)",
                    params![card_id, label_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_card_labels(&self, card_id: &str) -> Result<Vec<KanbanLabel>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT l.id, l.board_id, l.name, l.color, l.created_at
                 FROM kanban_labels l
                 JOIN kanban_card_labels cl ON l.id = cl.label_id
                 WHERE cl.card_id = ?1",
            )?;
            let rows = stmt
                .query_map([card_id], label_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Labels --

    pub fn create_label(&self, board_id: &str, name: &str, color: &str) -> Result<KanbanLabel> {
        let label = KanbanLabel {
            id: Uuid::new_v4().to_string(),
            board_id: board_id.to_string(),
            name: name.to_string(),
            color: color.to_string(),
            created_at: Utc::now(),
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO kanban_labels (id, board_id, name, color, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    label.id,
                    label.board_id,
                    label.name,
                    label.color,
                    format_ts(label.created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(label)
    }

    pub fn get_label(&self, id: &str) -> Result<Option<KanbanLabel>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, board_id, name, color, created_at FROM kanban_labels WHERE id = ?1",
            )?;
            Ok(stmt.query_row([id], label_from_row).optional()?)
        })
    }

    pub fn get_labels_for_board(&self, board_id: &str) -> Result<Vec<KanbanLabel>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, board_id, name, color, created_at
                 FROM kanban_labels WHERE board_id = ?1 ORDER BY name",
            )?;
            let rows = stmt
                .query_map([board_id], label_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_label(&self, id: &str, name: &str, color: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE kanban_labels SET name = ?1, color = ?2 WHERE id = ?3",
                params![name, color, id],
            )?;
            Ok(())
        })
    }

    pub fn delete_label(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM kanban_labels WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Comments --

    pub fn create_kanban_comment(
        &self,
        card_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<KanbanComment> {
        let now = Utc::now();
        let comment = KanbanComment {
            id: Uuid::new_v4().to_string(),
            card_id: card_id.to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
            user: None,
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO kanban_comments (id, card_id, user_id, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    comment.id,
                    comment.card_id,
                    comment.user_id,
                    comment.content,
                    format_ts(now),
                ],
            )?;
            Ok(())
        })?;

        Ok(comment)
    }

    pub fn get_kanban_comment(&self, id: &str) -> Result<Option<KanbanComment>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, card_id, user_id, content, created_at, updated_at
                 FROM kanban_comments WHERE id = ?1",
            )?;
            Ok(stmt
                .query_row([id], |row| comment_from_row(row, None))
                .optional()?)
        })
    }

    pub fn get_comments_for_card(&self, card_id: &str) -> Result<Vec<KanbanComment>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.card_id, c.user_id, c.content, c.created_at, c.updated_at,
                        u.id, u.username, u.display_name, u.password_hash,
                        u.avatar_url, u.status, u.created_at
                 FROM kanban_comments c
                 JOIN users u ON c.user_id = u.id
                 WHERE c.card_id = ?1
                 ORDER BY c.created_at ASC",
            )?;
            let rows = stmt
                .query_map([card_id], |row| {
                    let user = user_from_row(row, 6)?;
                    comment_from_row(row, Some(user.to_response()))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_kanban_comment(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM kanban_comments WHERE id = ?1", [id])?;
            Ok(())
        })
    }
}

fn comment_from_row(row: &Row, user: Option<UserResponse>) -> rusqlite::Result<KanbanComment> {
    Ok(KanbanComment {
        id: row.get(0)?,
        card_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        created_at: parse_ts(&row.get::<_, String>(4)?),
        updated_at: parse_ts(&row.get::<_, String>(5)?),
        user,
    })
}
