//! Integration tests for the per-app isolated stores.

use serde_json::json;
use smack_db::appdb::AppStores;
use uuid::Uuid;

fn temp_stores() -> AppStores {
    let mut root = std::env::temp_dir();
    root.push(format!("smack-apps-{}", Uuid::new_v4()));
    AppStores::new(root)
}

#[test]
fn create_insert_select_round_trip() {
    let stores = temp_stores();
    let app = "11111111-1111-1111-1111-111111111111";

    let resp = stores.query(
        app,
        "CREATE TABLE todos (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT, done INTEGER DEFAULT 0)",
        &[],
    );
    assert!(resp.error.is_empty(), "create failed: {}", resp.error);

    let resp = stores.query(
        app,
        "INSERT INTO todos (title, done) VALUES (?, ?)",
        &[json!("buy milk"), json!(0)],
    );
    assert!(resp.error.is_empty());
    assert_eq!(resp.columns, vec!["rows_affected", "last_insert_id"]);
    assert_eq!(resp.rows[0]["rows_affected"], json!(1));

    let resp = stores.query(app, "SELECT id, title, done FROM todos", &[]);
    assert!(resp.error.is_empty());
    assert_eq!(resp.columns, vec!["id", "title", "done"]);
    assert_eq!(resp.rows.len(), 1);
    assert_eq!(resp.rows[0]["title"], json!("buy milk"));
    assert_eq!(resp.rows[0]["done"], json!(0));
}

#[test]
fn disallowed_statements_return_error_values() {
    let stores = temp_stores();
    let app = "22222222-2222-2222-2222-222222222222";

    for sql in ["DROP TABLE todos", "PRAGMA user_version", "VACUUM"] {
        let resp = stores.query(app, sql, &[]);
        assert!(!resp.error.is_empty(), "{sql} should be rejected");
        assert!(resp.rows.is_empty());
    }
}

#[test]
fn sql_errors_surface_as_error_values_not_panics() {
    let stores = temp_stores();
    let app = "33333333-3333-3333-3333-333333333333";

    let resp = stores.query(app, "SELECT * FROM missing_table", &[]);
    assert!(!resp.error.is_empty());
}

#[test]
fn blob_values_coerce_to_text() {
    let stores = temp_stores();
    let app = "44444444-4444-4444-4444-444444444444";

    stores.query(app, "CREATE TABLE bin (data BLOB)", &[]);
    let resp = stores.query(app, "INSERT INTO bin (data) VALUES (x'68690a')", &[]);
    assert!(resp.error.is_empty());

    let resp = stores.query(app, "SELECT data FROM bin", &[]);
    assert!(resp.error.is_empty());
    assert_eq!(resp.rows[0]["data"], json!("hi\n"));
}

#[test]
fn apps_get_isolated_stores() {
    let stores = temp_stores();
    let a = "55555555-5555-5555-5555-555555555555";
    let b = "66666666-6666-6666-6666-666666666666";

    stores.query(a, "CREATE TABLE t (v INTEGER)", &[]);
    stores.query(a, "INSERT INTO t (v) VALUES (1)", &[]);

    // App B never created the table, so the query fails over there.
    let resp = stores.query(b, "SELECT * FROM t", &[]);
    assert!(!resp.error.is_empty());
}
