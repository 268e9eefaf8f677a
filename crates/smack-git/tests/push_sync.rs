//! End-to-end push plumbing: seed a repo from the store, push a modified
//! tree as a pack, and check the store row follows the new HEAD.

use std::sync::Arc;

use smack_db::Database;
use smack_gateway::Hub;
use smack_git::object::{encode_commit, encode_tree, object_id, ObjectType, TreeEntry};
use smack_git::pack::{read_pack, write_pack};
use smack_git::{GitState, Repository};
use uuid::Uuid;

fn temp_state() -> (GitState, String) {
    let mut db_path = std::env::temp_dir();
    db_path.push(format!("smack-push-test-{}.db", Uuid::new_v4()));
    let db = Arc::new(Database::open(&db_path).expect("open db"));

    let user = db.create_user("alice", "Alice", "h").unwrap();
    let app = db.create_app("demo", "", "", &user.id).unwrap();
    db.update_app_code(&app.id, "<p>old</p>", "body{}", "// js")
        .unwrap();

    let mut apps_dir = std::env::temp_dir();
    apps_dir.push(format!("smack-push-apps-{}", Uuid::new_v4()));

    let hub = Hub::new(db.clone());
    (GitState::new(db, hub, apps_dir), app.id)
}

#[tokio::test]
async fn first_contact_seeds_the_repo_from_the_store_row() {
    let (state, app_id) = temp_state();

    let repo = state.ensure_repo(&app_id).expect("seed repo");
    let blobs = repo.head_tree_blobs().unwrap();
    assert_eq!(blobs["index.html"], b"<p>old</p>");
    assert_eq!(blobs["styles.css"], b"body{}");
    assert_eq!(blobs["script.js"], b"// js");

    // Second contact opens without resync: mutate the store and make sure
    // the repo keeps its snapshot.
    state
        .db
        .update_app_code(&app_id, "<p>changed</p>", "", "")
        .unwrap();
    let repo = state.ensure_repo(&app_id).expect("reopen repo");
    assert_eq!(repo.head_tree_blobs().unwrap()["index.html"], b"<p>old</p>");
}

#[tokio::test]
async fn pushed_pack_objects_update_refs_and_sync_back_to_the_store() {
    let (state, app_id) = temp_state();
    let repo = state.ensure_repo(&app_id).expect("seed repo");

    // Build the pushed commit the way a client would: full objects only.
    let html = b"<h1>hi</h1>".to_vec();
    let css = b"body{}".to_vec();
    let js = b"// js".to_vec();
    let html_id = object_id(ObjectType::Blob, &html);
    let css_id = object_id(ObjectType::Blob, &css);
    let js_id = object_id(ObjectType::Blob, &js);

    let tree = encode_tree(&[
        TreeEntry { mode: "100644".into(), name: "index.html".into(), id: html_id },
        TreeEntry { mode: "100644".into(), name: "script.js".into(), id: js_id },
        TreeEntry { mode: "100644".into(), name: "styles.css".into(), id: css_id },
    ])
    .unwrap();
    let tree_id = object_id(ObjectType::Tree, &tree);
    let commit = encode_commit(&tree_id, "edit index.html", 1700000001);
    let commit_id = object_id(ObjectType::Commit, &commit);

    let objects: Vec<(ObjectType, &[u8])> = vec![
        (ObjectType::Blob, html.as_slice()),
        (ObjectType::Blob, css.as_slice()),
        (ObjectType::Blob, js.as_slice()),
        (ObjectType::Tree, tree.as_slice()),
        (ObjectType::Commit, commit.as_slice()),
    ];
    let pack = write_pack(objects, 5).unwrap();

    // The receive side: unpack, store, move the ref, then sync repo→store.
    for (kind, content) in read_pack(&pack).unwrap() {
        repo.store_object(kind, &content).unwrap();
    }
    repo.set_ref("refs/heads/main", &commit_id).unwrap();

    let blobs = repo.head_tree_blobs().unwrap();
    state
        .db
        .update_app_code(
            &app_id,
            &String::from_utf8_lossy(&blobs["index.html"]),
            &String::from_utf8_lossy(&blobs["styles.css"]),
            &String::from_utf8_lossy(&blobs["script.js"]),
        )
        .unwrap();

    let app = state.db.get_app(&app_id).unwrap().unwrap();
    assert_eq!(app.html_content, "<h1>hi</h1>");
    assert_eq!(repo.head().unwrap().as_deref(), Some(commit_id.as_str()));

    // A fresh clone of the new head carries the updated blob.
    let reachable = repo.collect_reachable(&[commit_id]).unwrap();
    assert_eq!(reachable.len(), 5);
}
