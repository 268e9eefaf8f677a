use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Current schema version. Increment this and add a new migration function
/// to the `MIGRATIONS` array when the schema changes.
const CURRENT_VERSION: u32 = 6;

/// Each migration is a function that takes a connection and applies changes.
/// Migrations are applied sequentially starting from the current version + 1.
type MigrationFn = fn(&Connection) -> Result<()>;

/// Ordered list of migrations. Index 0 = version 1, index 1 = version 2, etc.
const MIGRATIONS: &[MigrationFn] = &[
    migrate_v1,
    migrate_v2,
    migrate_v3,
    migrate_v4,
    migrate_v5,
    migrate_v6,
];

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version     INTEGER NOT NULL,
            applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = get_current_version(conn)?;
    info!(
        "Database schema version: {} (latest: {})",
        current, CURRENT_VERSION
    );

    if current >= CURRENT_VERSION {
        return Ok(());
    }

    // Each migration + version bump is wrapped in a transaction. BEGIN
    // IMMEDIATE acquires the write lock up front so concurrent writers
    // cannot interleave. On error the whole migration rolls back.
    for version in (current + 1)..=CURRENT_VERSION {
        let idx = (version - 1) as usize;
        info!("Applying migration v{}", version);

        conn.execute_batch("BEGIN IMMEDIATE")?;
        match MIGRATIONS[idx](conn) {
            Ok(()) => {
                conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
                conn.execute_batch("COMMIT")?;
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK").ok();
                return Err(anyhow::anyhow!("Migration v{} failed: {}", version, e));
            }
        }
    }

    info!("Database migrations complete (now at v{})", CURRENT_VERSION);
    Ok(())
}

fn get_current_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Version 1: core chat schema plus seed rows.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            display_name    TEXT NOT NULL,
            password_hash   TEXT NOT NULL,
            avatar_url      TEXT,
            status          TEXT NOT NULL DEFAULT 'offline',
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            description TEXT,
            is_direct   INTEGER NOT NULL DEFAULT 0,
            created_by  TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channel_members (
            channel_id   TEXT NOT NULL REFERENCES channels(id),
            user_id      TEXT NOT NULL REFERENCES users(id),
            joined_at    TEXT NOT NULL,
            last_read_at TEXT NOT NULL,
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_channel_members_user
            ON channel_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            thread_id   TEXT REFERENCES messages(id),
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages(thread_id);

        CREATE TABLE IF NOT EXISTS reminders (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            channel_id  TEXT NOT NULL,
            message     TEXT NOT NULL,
            remind_at   TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            completed   INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_reminders_time ON reminders(remind_at);

        CREATE TABLE IF NOT EXISTS muted_channels (
            user_id     TEXT NOT NULL REFERENCES users(id),
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            muted_at    TEXT NOT NULL,
            PRIMARY KEY (user_id, channel_id)
        );

        CREATE TABLE IF NOT EXISTS bots (
            id           TEXT PRIMARY KEY,
            name         TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            description  TEXT,
            provider     TEXT NOT NULL,
            model        TEXT NOT NULL,
            avatar_url   TEXT,
            created_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bot_channels (
            channel_id  TEXT PRIMARY KEY REFERENCES channels(id),
            bot_id      TEXT NOT NULL REFERENCES bots(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        CREATE TABLE IF NOT EXISTS webhooks (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            token       TEXT NOT NULL,
            created_by  TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_webhooks_channel ON webhooks(channel_id);

        -- Seed the default general channel and the system user. New users
        -- are auto-joined to general; reminders are delivered from smackbot.
        INSERT OR IGNORE INTO channels (id, name, description, is_direct, created_by, created_at)
            VALUES ('00000000-0000-0000-0000-000000000001', 'general',
                    'General discussion', 0, 'system', '1970-01-01T00:00:00.000000Z');

        INSERT OR IGNORE INTO users (id, username, display_name, password_hash, avatar_url, status, created_at)
            VALUES ('smackbot', 'smackbot', 'Smackbot', '', '', 'online',
                    '1970-01-01T00:00:00.000000Z');
        ",
    )?;
    Ok(())
}

/// Version 2: HTML widget support on messages (incoming webhooks).
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        ALTER TABLE messages ADD COLUMN html_content TEXT;
        ALTER TABLE messages ADD COLUMN widget_size TEXT;
        ",
    )?;
    Ok(())
}

/// Version 3: kanban boards.
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kanban_boards (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            description TEXT,
            icon        TEXT,
            created_by  TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kanban_board_members (
            board_id    TEXT NOT NULL REFERENCES kanban_boards(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            role        TEXT NOT NULL DEFAULT 'member',
            joined_at   TEXT NOT NULL,
            PRIMARY KEY (board_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_kanban_board_members_user
            ON kanban_board_members(user_id);

        CREATE TABLE IF NOT EXISTS kanban_columns (
            id          TEXT PRIMARY KEY,
            board_id    TEXT NOT NULL REFERENCES kanban_boards(id) ON DELETE CASCADE,
            name        TEXT NOT NULL,
            position    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_kanban_columns_board
            ON kanban_columns(board_id);

        CREATE TABLE IF NOT EXISTS kanban_labels (
            id          TEXT PRIMARY KEY,
            board_id    TEXT NOT NULL REFERENCES kanban_boards(id) ON DELETE CASCADE,
            name        TEXT NOT NULL,
            color       TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kanban_cards (
            id          TEXT PRIMARY KEY,
            column_id   TEXT NOT NULL REFERENCES kanban_columns(id) ON DELETE CASCADE,
            board_id    TEXT NOT NULL REFERENCES kanban_boards(id) ON DELETE CASCADE,
            title       TEXT NOT NULL,
            description TEXT,
            position    INTEGER NOT NULL DEFAULT 0,
            due_date    TEXT,
            created_by  TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_kanban_cards_column
            ON kanban_cards(column_id);

        CREATE TABLE IF NOT EXISTS kanban_card_assignees (
            card_id     TEXT NOT NULL REFERENCES kanban_cards(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            assigned_at TEXT NOT NULL,
            PRIMARY KEY (card_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS kanban_card_labels (
            card_id     TEXT NOT NULL REFERENCES kanban_cards(id) ON DELETE CASCADE,
            label_id    TEXT NOT NULL REFERENCES kanban_labels(id) ON DELETE CASCADE,
            PRIMARY KEY (card_id, label_id)
        );

        CREATE TABLE IF NOT EXISTS kanban_comments (
            id          TEXT PRIMARY KEY,
            card_id     TEXT NOT NULL REFERENCES kanban_cards(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// Version 4: apps (HTML/CSS/JS triplets) with membership and the
/// builder-conversation history.
fn migrate_v4(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS apps (
            id           TEXT PRIMARY KEY,
            name         TEXT NOT NULL,
            description  TEXT,
            icon         TEXT,
            html_content TEXT NOT NULL DEFAULT '',
            css_content  TEXT NOT NULL DEFAULT '',
            js_content   TEXT NOT NULL DEFAULT '',
            created_by   TEXT NOT NULL REFERENCES users(id),
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS app_members (
            app_id      TEXT NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            role        TEXT NOT NULL DEFAULT 'member',
            joined_at   TEXT NOT NULL,
            PRIMARY KEY (app_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_app_members_user ON app_members(user_id);

        CREATE TABLE IF NOT EXISTS app_messages (
            id          TEXT PRIMARY KEY,
            app_id      TEXT NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_app_messages_app ON app_messages(app_id);
        ",
    )?;
    Ok(())
}

/// Version 5: custom commands, user preferences, server settings.
fn migrate_v5(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS custom_commands (
            id            TEXT PRIMARY KEY,
            name          TEXT NOT NULL,
            description   TEXT,
            url           TEXT NOT NULL,
            method        TEXT NOT NULL DEFAULT 'GET',
            headers       TEXT,
            body_template TEXT,
            is_global     INTEGER NOT NULL DEFAULT 0,
            created_by    TEXT NOT NULL REFERENCES users(id),
            response_mode TEXT NOT NULL DEFAULT 'private',
            enabled       INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_custom_commands_name
            ON custom_commands(name);

        CREATE TABLE IF NOT EXISTS user_preferences (
            user_id     TEXT NOT NULL REFERENCES users(id),
            key         TEXT NOT NULL,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            PRIMARY KEY (user_id, key)
        );

        CREATE TABLE IF NOT EXISTS server_settings (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// Version 6: opaque bearer-token sessions.
fn migrate_v6(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            token       TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            expires_at  TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
        ",
    )?;
    Ok(())
}
