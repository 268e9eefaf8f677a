use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use smack_ai::prompts;
use smack_ai::sse::StreamEvent;
use smack_ai::{InputMessage, Tool};
use smack_types::api::{
    AddAppMemberRequest, AppChatRequest, AppCodeResponse, AppQueryRequest, CreateAppRequest,
    UpdateAppCodeRequest, UpdateAppRequest,
};
use smack_types::events::WsEvent;
use smack_types::models::App;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

const APP_CHAT_CONTEXT: i64 = 20;
const CODE_UPDATED_FALLBACK: &str = "I've updated the app code. Check the preview on the left!";
const APOLOGY: &str = "Sorry, I'm having trouble connecting right now. Please try again later.";

fn require_member(state: &AppState, app_id: &str, user_id: &str) -> Result<(), ApiError> {
    if state.db.is_app_member(app_id, user_id)? {
        Ok(())
    } else {
        Err(ApiError::forbidden("Not a member of this app"))
    }
}

fn require_manager(state: &AppState, app_id: &str, user_id: &str) -> Result<(), ApiError> {
    match state.db.get_app_member_role(app_id, user_id)? {
        Some(role) if role == "owner" || role == "admin" => Ok(()),
        Some(_) => Err(ApiError::forbidden("Not authorized")),
        None => Err(ApiError::forbidden("Not a member of this app")),
    }
}

// -- CRUD --

pub async fn list(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.db.get_apps_for_user(&user_id)?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateAppRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::bad_request("App name is required"));
    }

    let app = state
        .db
        .create_app(&req.name, &req.description, &req.icon, &user_id)?;

    if let Err(e) = std::fs::create_dir_all(state.app_stores.app_dir(&app.id)) {
        warn!("Failed to create app data directory: {}", e);
    }

    Ok((StatusCode::CREATED, Json(app)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &app_id, &user_id)?;
    let app = state
        .db
        .get_app(&app_id)?
        .ok_or_else(|| ApiError::not_found("App not found"))?;
    Ok(Json(app))
}

pub async fn update(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<UpdateAppRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_manager(&state, &app_id, &user_id)?;

    let app = state
        .db
        .get_app(&app_id)?
        .ok_or_else(|| ApiError::not_found("App not found"))?;

    let name = req.name.filter(|n| !n.is_empty()).unwrap_or(app.name);
    let description = req.description.unwrap_or(app.description);
    state
        .db
        .update_app(&app_id, &name, &description, req.icon.as_deref())?;

    let updated = state
        .db
        .get_app(&app_id)?
        .ok_or_else(|| ApiError::not_found("App not found"))?;
    Ok(Json(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    match state.db.get_app_member_role(&app_id, &user_id)? {
        Some(role) if role == "owner" => {}
        _ => return Err(ApiError::forbidden("Only the owner can delete an app")),
    }

    // Drop the cached store handle and the app's files (private store plus
    // bare repository) before the row goes away.
    state.app_stores.close(&app_id);
    if let Err(e) = std::fs::remove_dir_all(state.app_stores.app_dir(&app_id)) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove app directory: {}", e);
        }
    }

    state.db.delete_app(&app_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Members --

pub async fn members(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &app_id, &user_id)?;
    Ok(Json(state.db.get_app_members(&app_id)?))
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<AddAppMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_manager(&state, &app_id, &user_id)?;

    let role = match req.role.as_str() {
        "admin" => "admin",
        _ => "member",
    };
    state.db.add_app_member(&app_id, &req.user_id, role)?;
    Ok(StatusCode::CREATED)
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((app_id, target_user_id)): Path<(String, String)>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_manager(&state, &app_id, &user_id)?;

    // The owner is never removable through this path.
    if state.db.get_app_member_role(&app_id, &target_user_id)?.as_deref() == Some("owner") {
        return Err(ApiError::bad_request("Cannot remove the owner"));
    }

    state.db.remove_app_member(&app_id, &target_user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Code --

pub async fn get_code(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &app_id, &user_id)?;
    let app = state
        .db
        .get_app(&app_id)?
        .ok_or_else(|| ApiError::not_found("App not found"))?;

    Ok(Json(AppCodeResponse {
        html_content: app.html_content,
        css_content: app.css_content,
        js_content: app.js_content,
    }))
}

pub async fn update_code(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<UpdateAppCodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &app_id, &user_id)?;

    let app = state
        .db
        .get_app(&app_id)?
        .ok_or_else(|| ApiError::not_found("App not found"))?;

    let html = req.html_content.filter(|s| !s.is_empty()).unwrap_or(app.html_content);
    let css = req.css_content.filter(|s| !s.is_empty()).unwrap_or(app.css_content);
    let js = req.js_content.filter(|s| !s.is_empty()).unwrap_or(app.js_content);

    state.db.update_app_code(&app_id, &html, &css, &js)?;

    // Repo sync happens off the request; subscribers hear about the change
    // right away.
    state.git.schedule_repo_sync(&app_id);
    state.git.broadcast_code_update(&app_id).await;

    let updated = state
        .db
        .get_app(&app_id)?
        .ok_or_else(|| ApiError::not_found("App not found"))?;
    Ok(Json(updated))
}

/// Serves the app as a complete HTML document with the SmackDB query shim
/// injected.
pub async fn serve(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &app_id, &user_id)?;
    let app = state
        .db
        .get_app(&app_id)?
        .ok_or_else(|| ApiError::not_found("App not found"))?;

    Ok((
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        render_app_document(&app),
    ))
}

fn render_app_document(app: &App) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
{css}
    </style>
</head>
<body>
{html}
    <script>
// SmackDB API helper
const SmackDB = {{
    appId: '{app_id}',
    async query(sql, params = []) {{
        const response = await fetch('/api/apps/' + this.appId + '/query', {{
            method: 'POST',
            headers: {{
                'Content-Type': 'application/json',
                'Authorization': 'Bearer ' + window.smackToken
            }},
            body: JSON.stringify({{ query: sql, params: params }})
        }});
        return response.json();
    }}
}};

{js}
    </script>
</body>
</html>"#,
        title = app.name,
        css = app.css_content,
        html = app.html_content,
        app_id = app.id,
        js = app.js_content,
    )
}

// -- Per-app query endpoint --

pub async fn query(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<AppQueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &app_id, &user_id)?;

    // The whitelist and all SQL failures come back as `error` values, not
    // HTTP failures.
    let state = state.clone();
    let response = tokio::task::spawn_blocking(move || {
        state.app_stores.query(&app_id, &req.query, &req.params)
    })
    .await?;

    Ok(Json(response))
}

// -- Builder chat --

fn update_code_tool() -> Tool {
    Tool {
        kind: "function".into(),
        name: "update_code".into(),
        description: "Update the app's HTML, CSS, and/or JavaScript code. Call this function \
                      when you need to create or modify the app's code."
            .into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "html": {
                    "type": "string",
                    "description": "The complete HTML content for the body of the app (no html/head/body tags, just the inner content)"
                },
                "css": {
                    "type": "string",
                    "description": "The complete CSS styles for the app"
                },
                "js": {
                    "type": "string",
                    "description": "The complete JavaScript code for the app"
                }
            },
            "required": []
        }),
    }
}

pub async fn chat(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<AppChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &app_id, &user_id)?;
    if req.message.is_empty() {
        return Err(ApiError::bad_request("Message is required"));
    }

    let app = state
        .db
        .get_app(&app_id)?
        .ok_or_else(|| ApiError::not_found("App not found"))?;

    let client = state
        .mediator
        .client("openai")
        .filter(|c| c.is_configured())
        .ok_or_else(|| ApiError::unavailable("AI service not available"))?;

    // History first, then persist the new turn, so the context window
    // carries the inbound message exactly once.
    let history = state.db.get_app_messages(&app_id, APP_CHAT_CONTEXT)?;
    let mut context: Vec<InputMessage> = history
        .iter()
        .map(|m| InputMessage::new(&m.role, &m.content))
        .collect();
    context.push(InputMessage::new("user", &req.message));

    state
        .db
        .create_app_message(&app_id, &user_id, "user", &req.message)?;

    let message_id = Uuid::new_v4().to_string();
    state
        .hub
        .broadcast_to_app(
            &app_id,
            &WsEvent::AppStreamStart {
                message_id: message_id.clone(),
                app_id: app_id.clone(),
            },
        )
        .await;

    let system_prompt = prompts::app_builder(&app);
    let tools = [update_code_tool()];

    let mut full_text = String::new();
    let mut tool_args = String::new();
    let mut code_updated = false;
    let mut failed = false;

    match client
        .stream_response_with_tools(&context, &system_prompt, &tools)
        .await
    {
        Ok(mut stream) => loop {
            match stream.next_event().await {
                Ok(Some(StreamEvent::OutputTextDelta(delta))) => {
                    full_text.push_str(&delta);
                    state
                        .hub
                        .broadcast_to_app(
                            &app_id,
                            &WsEvent::AppStreamDelta {
                                message_id: message_id.clone(),
                                app_id: app_id.clone(),
                                delta,
                                full_text: full_text.clone(),
                            },
                        )
                        .await;
                }
                Ok(Some(StreamEvent::OutputTextDone(text))) => full_text = text,
                Ok(Some(StreamEvent::FunctionCallArgumentsStart)) => tool_args.clear(),
                Ok(Some(StreamEvent::FunctionCallArgumentsDelta(delta))) => {
                    tool_args.push_str(&delta)
                }
                Ok(Some(StreamEvent::FunctionCallArgumentsDone)) => {}
                Ok(Some(StreamEvent::FunctionCallDone(call))) => {
                    if call.name == "update_code" {
                        let arguments = if call.arguments.is_empty() {
                            tool_args.clone()
                        } else {
                            call.arguments.clone()
                        };
                        match dispatch_update_code(&state, &app_id, &arguments).await {
                            Ok(()) => code_updated = true,
                            Err(e) => warn!("update_code dispatch failed: {:#}", e),
                        }
                    } else {
                        warn!("Ignoring unknown tool call: {}", call.name);
                    }
                }
                Ok(Some(StreamEvent::StreamError(message))) => {
                    warn!("App chat stream error: {}", message);
                    failed = true;
                    break;
                }
                Ok(Some(StreamEvent::Done)) => break,
                Ok(None) => break,
                Err(e) => {
                    warn!("App chat stream failed: {:#}", e);
                    failed = true;
                    break;
                }
            }
        },
        Err(e) => {
            warn!("Failed to open app chat stream: {:#}", e);
            failed = true;
        }
    }

    let final_content = if failed {
        APOLOGY.to_string()
    } else if full_text.is_empty() && code_updated {
        // The model sometimes calls the tool and says nothing; give the
        // user something to read.
        CODE_UPDATED_FALLBACK.to_string()
    } else {
        full_text
    };

    state
        .db
        .create_app_message(&app_id, "assistant", "assistant", &final_content)?;

    state
        .hub
        .broadcast_to_app(
            &app_id,
            &WsEvent::AppStreamEnd {
                message_id: message_id.clone(),
                app_id: app_id.clone(),
                content: final_content.clone(),
            },
        )
        .await;

    Ok(Json(json!({
        "message_id": message_id,
        "content": final_content,
    })))
}

/// Writes the new triplet, schedules the repo sync, and tells subscribers,
/// all mid-stream.
async fn dispatch_update_code(
    state: &AppState,
    app_id: &str,
    arguments: &str,
) -> anyhow::Result<()> {
    #[derive(serde::Deserialize, Default)]
    #[serde(default)]
    struct CodeArgs {
        html: String,
        css: String,
        js: String,
    }

    let args: CodeArgs = serde_json::from_str(arguments)?;
    info!(
        "update_code: html {} bytes, css {} bytes, js {} bytes",
        args.html.len(),
        args.css.len(),
        args.js.len()
    );

    state.db.update_app_code(app_id, &args.html, &args.css, &args.js)?;
    state.git.schedule_repo_sync(app_id);
    state.git.broadcast_code_update(app_id).await;
    Ok(())
}

pub async fn chat_history(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &app_id, &user_id)?;
    Ok(Json(state.db.get_app_messages(&app_id, 50)?))
}
