//! The smart-HTTP surface: `info/refs`, `git-upload-pack`, and
//! `git-receive-pack` for per-app repositories. Basic auth carries a bearer
//! token in the password field; reads need app membership, writes need the
//! owner or admin role.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::SecondsFormat;
use tracing::{info, warn};
use uuid::Uuid;

use smack_db::Database;
use smack_gateway::Hub;
use smack_types::events::WsEvent;

use crate::pack::{read_pack, write_pack};
use crate::pkt::{parse_ref_commands, parse_wants, write_flush, write_pkt_str, ZERO_ID};
use crate::repo::Repository;

const UPLOAD_PACK_CAPS: &str =
    "multi_ack_detailed no-done thin-pack ofs-delta shallow no-progress allow-tip-sha1-in-want";
// No ofs-delta here: clients must push full objects.
const RECEIVE_PACK_CAPS: &str = "report-status delete-refs no-thin";

#[derive(Clone)]
pub struct GitState {
    pub db: Arc<Database>,
    pub hub: Hub,
    pub apps_dir: PathBuf,
}

impl GitState {
    pub fn new(db: Arc<Database>, hub: Hub, apps_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            hub,
            apps_dir: apps_dir.into(),
        }
    }

    fn repo_path(&self, app_id: &str) -> PathBuf {
        self.apps_dir.join(app_id).join("git")
    }

    /// Opens the app's repository, creating and seeding it from the store's
    /// current triplet on first contact. Later requests reuse the repo as-is;
    /// store→repo sync otherwise happens only on REST-side code updates.
    pub fn ensure_repo(&self, app_id: &str) -> Result<Repository> {
        let path = self.repo_path(app_id);
        if let Some(repo) = Repository::open(&path) {
            return Ok(repo);
        }

        let app = self
            .db
            .get_app(app_id)?
            .with_context(|| format!("app not found: {app_id}"))?;

        let repo = Repository::init(&path)?;
        repo.commit_snapshot(
            &app.html_content,
            &app.css_content,
            &app.js_content,
            app.updated_at.timestamp(),
        )?;
        Ok(repo)
    }

    /// Store→repo sync after a REST-side or tool-driven code update. A
    /// missing repo is fine; it will be seeded on first git contact.
    pub fn sync_store_to_repo(&self, app_id: &str) -> Result<()> {
        let Some(repo) = Repository::open(&self.repo_path(app_id)) else {
            return Ok(());
        };
        let app = self
            .db
            .get_app(app_id)?
            .with_context(|| format!("app not found: {app_id}"))?;
        repo.commit_snapshot(
            &app.html_content,
            &app.css_content,
            &app.js_content,
            app.updated_at.timestamp(),
        )?;
        Ok(())
    }

    /// Fire-and-forget repo sync, used by code paths that must not block on
    /// file I/O (REST updates, the update_code tool).
    pub fn schedule_repo_sync(&self, app_id: &str) {
        let state = self.clone();
        let app_id = app_id.to_string();
        tokio::spawn(async move {
            let sync = {
                let state = state.clone();
                let app_id = app_id.clone();
                tokio::task::spawn_blocking(move || state.sync_store_to_repo(&app_id)).await
            };
            match sync {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Repo sync for app {} failed: {}", app_id, e),
                Err(e) => warn!("Repo sync task for app {} panicked: {}", app_id, e),
            }
        });
    }

    /// Broadcasts the app's current code triplet to its subscribers.
    pub async fn broadcast_code_update(&self, app_id: &str) {
        let app = match self.db.get_app(app_id) {
            Ok(Some(app)) => app,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to load app {} for broadcast: {}", app_id, e);
                return;
            }
        };

        self.hub
            .broadcast_to_app(
                app_id,
                &WsEvent::AppCodeUpdated {
                    app_id: app_id.to_string(),
                    html_content: app.html_content,
                    css_content: app.css_content,
                    js_content: app.js_content,
                    updated_at: app.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                },
            )
            .await;
    }
}

pub fn git_router(state: GitState) -> Router {
    Router::new()
        .route("/git/{app_id}/info/refs", get(info_refs))
        .route("/git/{app_id}/git-upload-pack", post(upload_pack))
        .route("/git/{app_id}/git-receive-pack", post(receive_pack))
        .with_state(state)
}

/// Extracts the bearer token from the basic-auth password field and
/// resolves it to a user id. The username field is ignored.
fn authenticate(state: &GitState, headers: &HeaderMap) -> Result<String, Response> {
    let challenge = || {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"Smack Git\"")],
            "Authentication required",
        )
            .into_response()
    };

    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(challenge)?;
    let encoded = auth.strip_prefix("Basic ").ok_or_else(challenge)?;
    let decoded = BASE64.decode(encoded).map_err(|_| challenge())?;
    let decoded = String::from_utf8(decoded).map_err(|_| challenge())?;
    let (_, token) = decoded.split_once(':').ok_or_else(challenge)?;

    match state.db.get_session_user(token) {
        Ok(Some(user_id)) => Ok(user_id),
        Ok(None) => Err(challenge()),
        Err(e) => {
            warn!("Token validation failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

fn authorize_read(state: &GitState, app_id: &str, user_id: &str) -> Result<(), Response> {
    match state.db.is_app_member(app_id, user_id) {
        Ok(true) => Ok(()),
        Ok(false) => Err((StatusCode::FORBIDDEN, "Not a member of this app").into_response()),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}

fn authorize_write(state: &GitState, app_id: &str, user_id: &str) -> Result<(), Response> {
    match state.db.get_app_member_role(app_id, user_id) {
        Ok(Some(role)) if role == "owner" || role == "admin" => Ok(()),
        Ok(Some(_)) => Err((
            StatusCode::FORBIDDEN,
            "Insufficient permissions: only owners and admins can push",
        )
            .into_response()),
        Ok(None) => Err((StatusCode::FORBIDDEN, "Not a member of this app").into_response()),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}

fn validate_app_id(app_id: &str) -> Result<(), Response> {
    Uuid::parse_str(app_id)
        .map(|_| ())
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid app ID").into_response())
}

async fn info_refs(
    State(state): State<GitState>,
    Path(app_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = validate_app_id(&app_id) {
        return resp;
    }
    let user_id = match authenticate(&state, &headers) {
        Ok(user_id) => user_id,
        Err(resp) => return resp,
    };

    let service = params.get("service").map(String::as_str).unwrap_or("");
    let caps = match service {
        "git-upload-pack" => {
            if let Err(resp) = authorize_read(&state, &app_id, &user_id) {
                return resp;
            }
            UPLOAD_PACK_CAPS
        }
        "git-receive-pack" => {
            if let Err(resp) = authorize_write(&state, &app_id, &user_id) {
                return resp;
            }
            RECEIVE_PACK_CAPS
        }
        _ => return (StatusCode::BAD_REQUEST, "Invalid service").into_response(),
    };

    let repo = match state.ensure_repo(&app_id) {
        Ok(repo) => repo,
        Err(e) => {
            warn!("Failed to ensure repo for app {}: {}", app_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to access repository")
                .into_response();
        }
    };

    let mut body = Vec::new();
    write_pkt_str(&mut body, &format!("# service={service}\n"));
    write_flush(&mut body);
    advertise_refs(&mut body, &repo, caps);

    (
        [
            (
                header::CONTENT_TYPE,
                format!("application/x-{service}-advertisement"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}

/// HEAD leads the advertisement with the capability list after a NUL byte,
/// then every non-symbolic ref follows; with no refs at all the zero id is
/// advertised under `capabilities^{}`.
fn advertise_refs(out: &mut Vec<u8>, repo: &Repository, caps: &str) {
    let mut first = true;

    if let Ok(Some(head)) = repo.head() {
        write_pkt_str(out, &format!("{head} HEAD\0{caps}\n"));
        first = false;
    }

    for (name, id) in repo.refs().unwrap_or_default() {
        if first {
            write_pkt_str(out, &format!("{id} {name}\0{caps}\n"));
            first = false;
        } else {
            write_pkt_str(out, &format!("{id} {name}\n"));
        }
    }

    if first {
        write_pkt_str(out, &format!("{ZERO_ID} capabilities^{{}}\0{caps}\n"));
    }

    write_flush(out);
}

async fn upload_pack(
    State(state): State<GitState>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = validate_app_id(&app_id) {
        return resp;
    }
    let user_id = match authenticate(&state, &headers) {
        Ok(user_id) => user_id,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize_read(&state, &app_id, &user_id) {
        return resp;
    }

    let Some(repo) = Repository::open(&state.repo_path(&app_id)) else {
        return (StatusCode::NOT_FOUND, "Repository not found").into_response();
    };

    let content_type = (
        header::CONTENT_TYPE,
        "application/x-git-upload-pack-result".to_string(),
    );

    let wants = parse_wants(&body);
    let mut out: Vec<u8> = b"0008NAK\n".to_vec();

    if wants.is_empty() {
        return ([content_type], out).into_response();
    }

    let objects = match repo.collect_reachable(&wants) {
        Ok(objects) => objects,
        Err(e) => {
            warn!("Failed to collect objects for app {}: {}", app_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate packfile")
                .into_response();
        }
    };

    let count = objects.len();
    let pack = match write_pack(
        objects.values().map(|(kind, content)| (*kind, content.as_slice())),
        count,
    ) {
        Ok(pack) => pack,
        Err(e) => {
            warn!("Failed to write pack for app {}: {}", app_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate packfile")
                .into_response();
        }
    };

    info!("upload-pack for app {}: {} objects", app_id, count);
    out.extend_from_slice(&pack);
    ([content_type], out).into_response()
}

async fn receive_pack(
    State(state): State<GitState>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = validate_app_id(&app_id) {
        return resp;
    }
    let user_id = match authenticate(&state, &headers) {
        Ok(user_id) => user_id,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize_write(&state, &app_id, &user_id) {
        return resp;
    }

    let Some(repo) = Repository::open(&state.repo_path(&app_id)) else {
        return (StatusCode::NOT_FOUND, "Repository not found").into_response();
    };

    let (commands, pack_start) = parse_ref_commands(&body);
    if commands.is_empty() {
        return status_report(Err("no commands in request"));
    }

    // Unpack every full object before touching any ref.
    if pack_start < body.len() {
        let objects = match read_pack(&body[pack_start..]) {
            Ok(objects) => objects,
            Err(e) => return status_report(Err(&format!("{e:#}"))),
        };
        for (kind, content) in &objects {
            if let Err(e) = repo.store_object(*kind, content) {
                return status_report(Err(&format!("failed to store object: {e}")));
            }
        }
        info!(
            "receive-pack for app {}: stored {} objects",
            app_id,
            objects.len()
        );
    }

    for command in &commands {
        if command.new_id != ZERO_ID && !repo.has_object(&command.new_id) {
            return status_report(Err(&format!("missing object {}", command.new_id)));
        }
        if let Err(e) = repo.set_ref(&command.ref_name, &command.new_id) {
            return status_report(Err(&format!("failed to update ref: {e}")));
        }
    }

    // Repo→store sync, then notify app subscribers.
    match repo.head_tree_blobs() {
        Ok(blobs) => {
            let get = |name: &str| {
                blobs
                    .get(name)
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default()
            };
            if let Err(e) = state.db.update_app_code(
                &app_id,
                &get("index.html"),
                &get("styles.css"),
                &get("script.js"),
            ) {
                return status_report(Err(&format!("failed to sync files: {e}")));
            }
            state.broadcast_code_update(&app_id).await;
        }
        Err(e) => {
            // A branch delete can legitimately leave HEAD dangling.
            warn!("No HEAD tree after push to app {}: {}", app_id, e);
        }
    }

    status_report(Ok(&commands.iter().map(|c| c.ref_name.as_str()).collect::<Vec<_>>()))
}

/// `unpack ok` plus one `ok <ref>` per command on success; a single
/// `unpack <msg>` on failure.
fn status_report(result: Result<&Vec<&str>, &str>) -> Response {
    let mut body = Vec::new();
    match result {
        Ok(refs) => {
            write_pkt_str(&mut body, "unpack ok\n");
            for name in refs {
                write_pkt_str(&mut body, &format!("ok {name}\n"));
            }
        }
        Err(msg) => {
            write_pkt_str(&mut body, &format!("unpack {msg}\n"));
        }
    }
    write_flush(&mut body);

    (
        [(
            header::CONTENT_TYPE,
            "application/x-git-receive-pack-result".to_string(),
        )],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::object_id;

    #[test]
    fn advertisement_leads_with_head_and_caps() {
        let mut path = std::env::temp_dir();
        path.push(format!("smack-git-adv-{}", uuid::Uuid::new_v4()));
        let repo = Repository::init(&path).unwrap();
        let commit_id = repo.commit_snapshot("h", "c", "j", 1700000000).unwrap();

        let mut out = Vec::new();
        advertise_refs(&mut out, &repo, RECEIVE_PACK_CAPS);
        let text = String::from_utf8_lossy(&out);

        assert!(text.contains(&format!("{commit_id} HEAD\0{RECEIVE_PACK_CAPS}\n")));
        assert!(text.contains(&format!("{commit_id} refs/heads/main\n")));
        assert!(text.ends_with("0000"));
    }

    #[test]
    fn empty_repo_advertises_capabilities_placeholder() {
        let mut path = std::env::temp_dir();
        path.push(format!("smack-git-adv-empty-{}", uuid::Uuid::new_v4()));
        let repo = Repository::init(&path).unwrap();

        let mut out = Vec::new();
        advertise_refs(&mut out, &repo, UPLOAD_PACK_CAPS);
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("capabilities^{}"));
    }

    #[test]
    fn object_ids_stay_stable_through_pack_round_trip() {
        let mut path = std::env::temp_dir();
        path.push(format!("smack-git-pack-{}", uuid::Uuid::new_v4()));
        let repo = Repository::init(&path).unwrap();
        let commit_id = repo.commit_snapshot("<h1>hi</h1>", "", "", 1700000000).unwrap();

        let objects = repo.collect_reachable(&[commit_id.clone()]).unwrap();
        let count = objects.len();
        let pack = write_pack(
            objects.values().map(|(k, c)| (*k, c.as_slice())),
            count,
        )
        .unwrap();

        let mut other_path = std::env::temp_dir();
        other_path.push(format!("smack-git-pack2-{}", uuid::Uuid::new_v4()));
        let other = Repository::init(&other_path).unwrap();
        for (kind, content) in read_pack(&pack).unwrap() {
            other.store_object(kind, &content).unwrap();
        }

        assert!(other.has_object(&commit_id));
        for id in objects.keys() {
            assert!(other.has_object(id), "object {id} missing after round trip");
        }
        assert_eq!(
            object_id(objects[&commit_id].0, &objects[&commit_id].1),
            commit_id
        );
    }
}
