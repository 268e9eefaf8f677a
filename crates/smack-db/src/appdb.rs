use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use tracing::info;

use smack_types::api::AppQueryResponse;

/// Statement shapes the per-app store accepts, by normalized prefix.
const ALLOWED_PREFIXES: &[&str] = &[
    "SELECT",
    "INSERT",
    "UPDATE",
    "DELETE",
    "CREATE TABLE",
    "CREATE INDEX",
];

/// Cache of per-app SQLite stores, one isolated file per app under
/// `<root>/<app-id>/data.db`, opened lazily.
pub struct AppStores {
    root: PathBuf,
    stores: RwLock<HashMap<String, Arc<Mutex<Connection>>>>,
}

impl AppStores {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn app_dir(&self, app_id: &str) -> PathBuf {
        self.root.join(app_id)
    }

    /// Lazily opens an app's store. Double-checked lock: fast path under the
    /// read lock, open under the write lock only if still absent.
    fn get(&self, app_id: &str) -> Result<Arc<Mutex<Connection>>> {
        {
            let stores = self
                .stores
                .read()
                .map_err(|e| anyhow::anyhow!("app store lock poisoned: {e}"))?;
            if let Some(db) = stores.get(app_id) {
                return Ok(db.clone());
            }
        }

        let mut stores = self
            .stores
            .write()
            .map_err(|e| anyhow::anyhow!("app store lock poisoned: {e}"))?;
        if let Some(db) = stores.get(app_id) {
            return Ok(db.clone());
        }

        let dir = self.app_dir(app_id);
        std::fs::create_dir_all(&dir)?;
        let conn = Connection::open(dir.join("data.db"))?;
        info!("Opened app store for {}", app_id);

        let db = Arc::new(Mutex::new(conn));
        stores.insert(app_id.to_string(), db.clone());
        Ok(db)
    }

    /// Drops the cached handle (app deletion). The caller removes the files.
    pub fn close(&self, app_id: &str) {
        if let Ok(mut stores) = self.stores.write() {
            stores.remove(app_id);
        }
    }

    /// Runs one whitelisted statement against an app's private store.
    /// Every failure mode comes back as an `error` value in the response;
    /// nothing here propagates as a crash.
    pub fn query(&self, app_id: &str, sql: &str, params: &[Value]) -> AppQueryResponse {
        if !is_allowed_query(sql) {
            return AppQueryResponse {
                error: "Query type not allowed. Only SELECT, INSERT, UPDATE, DELETE, \
                        CREATE TABLE, CREATE INDEX are permitted."
                    .into(),
                ..Default::default()
            };
        }

        let db = match self.get(app_id) {
            Ok(db) => db,
            Err(e) => {
                return AppQueryResponse {
                    error: format!("Failed to open app database: {e}"),
                    ..Default::default()
                }
            }
        };
        let conn = match db.lock() {
            Ok(conn) => conn,
            Err(e) => {
                return AppQueryResponse {
                    error: format!("App database lock poisoned: {e}"),
                    ..Default::default()
                }
            }
        };

        match run_statement(&conn, sql, params) {
            Ok(resp) => resp,
            Err(e) => AppQueryResponse {
                error: e.to_string(),
                ..Default::default()
            },
        }
    }
}

pub fn is_allowed_query(sql: &str) -> bool {
    let normalized = sql.trim().to_uppercase();
    ALLOWED_PREFIXES
        .iter()
        .any(|prefix| normalized.starts_with(prefix))
}

fn run_statement(conn: &Connection, sql: &str, params: &[Value]) -> Result<AppQueryResponse> {
    let bound = params.iter().map(json_to_sql).collect::<Vec<_>>();
    let param_refs = rusqlite::params_from_iter(bound.iter());

    let mut stmt = conn.prepare(sql)?;

    if sql.trim_start().to_uppercase().starts_with("SELECT") {
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let count = columns.len();

        let mut rows = stmt.query(param_refs)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = serde_json::Map::with_capacity(count);
            for (i, column) in columns.iter().enumerate() {
                object.insert(column.clone(), value_to_json(row.get_ref(i)?));
            }
            out.push(object);
        }

        return Ok(AppQueryResponse {
            columns,
            rows: out,
            error: String::new(),
        });
    }

    let affected = stmt.execute(param_refs)?;
    let last_id = conn.last_insert_rowid();

    let mut row = serde_json::Map::new();
    row.insert("rows_affected".into(), Value::from(affected as i64));
    row.insert("last_insert_id".into(), Value::from(last_id));

    Ok(AppQueryResponse {
        columns: vec!["rows_affected".into(), "last_insert_id".into()],
        rows: vec![row],
        error: String::new(),
    })
}

fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as SqlValue;
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// BLOB values are coerced to text so app responses stay plain JSON.
fn value_to_json(value: ValueRef) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(String::from_utf8_lossy(b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_is_prefix_and_case_insensitive() {
        assert!(is_allowed_query("select * from t"));
        assert!(is_allowed_query("  CREATE TABLE t (id INTEGER)"));
        assert!(is_allowed_query("create index idx on t(id)"));
        assert!(!is_allowed_query("DROP TABLE t"));
        assert!(!is_allowed_query("PRAGMA journal_mode"));
        assert!(!is_allowed_query("ATTACH DATABASE 'x' AS y"));
        assert!(!is_allowed_query("CREATE TRIGGER trg AFTER INSERT ON t BEGIN END"));
    }
}
