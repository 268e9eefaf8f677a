use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::json;
use tracing::warn;

use smack_ai::prompts;
use smack_ai::InputMessage;
use smack_types::api::{
    AiGenerateCommandRequest, AiGenerateCommandResponse, CommandExecutionResult,
    CreateCommandRequest, ExecuteCommandRequest, UpdateCommandRequest,
};
use smack_types::events::WsEvent;
use smack_types::models::{CustomCommand, MessageWithUser};

use crate::error::ApiError;
use crate::interpolate::{interpolate, interpolate_url, InterpolationContext};
use crate::middleware::AuthUser;
use crate::state::AppState;

/// Channel post-backs are truncated at this many characters.
const POSTBACK_LIMIT: usize = 2000;
/// At most this much of a response body is read.
const BODY_LIMIT: usize = 1024 * 1024;

pub async fn create(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateCommandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }
    if req.url.is_empty() {
        return Err(ApiError::bad_request("URL is required"));
    }
    if !req.url.starts_with("http://") && !req.url.starts_with("https://") {
        return Err(ApiError::bad_request("URL must start with http:// or https://"));
    }

    let method = match req.method.to_uppercase().as_str() {
        "POST" => "POST",
        _ => "GET",
    };
    let response_mode = match req.response_mode.as_str() {
        "channel" => "channel",
        _ => "private",
    };

    let cmd = state.db.create_command(
        &req.name,
        &req.description,
        &req.url,
        method,
        &req.headers,
        &req.body_template,
        response_mode,
        &user_id,
        req.is_global,
    )?;

    Ok((StatusCode::CREATED, Json(cmd)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.db.get_commands_for_user(&user_id)?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let cmd = state
        .db
        .get_command(&command_id)?
        .ok_or_else(|| ApiError::not_found("Command not found"))?;

    if !cmd.is_global && cmd.created_by != user_id {
        return Err(ApiError::forbidden("Not authorized"));
    }

    Ok(Json(cmd))
}

pub async fn update(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<UpdateCommandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cmd = state
        .db
        .get_command(&command_id)?
        .ok_or_else(|| ApiError::not_found("Command not found"))?;
    if cmd.created_by != user_id {
        return Err(ApiError::forbidden("Not authorized to update this command"));
    }

    if let Some(method) = &req.method {
        let method = method.to_uppercase();
        if method != "GET" && method != "POST" {
            return Err(ApiError::bad_request("Method must be GET or POST"));
        }
    }
    if let Some(url) = &req.url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ApiError::bad_request("URL must start with http:// or https://"));
        }
    }
    if let Some(mode) = &req.response_mode {
        if mode != "private" && mode != "channel" {
            return Err(ApiError::bad_request(
                "Response mode must be 'private' or 'channel'",
            ));
        }
    }

    state.db.update_command(&command_id, &req)?;

    let updated = state
        .db
        .get_command(&command_id)?
        .ok_or_else(|| ApiError::not_found("Command not found"))?;
    Ok(Json(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.delete_command(&command_id, &user_id)?;
    Ok(Json(json!({ "message": "command deleted" })))
}

pub async fn execute(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<ExecuteCommandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.command_id.is_empty() {
        return Err(ApiError::bad_request("Command ID is required"));
    }

    let cmd = state
        .db
        .get_command(&req.command_id)?
        .ok_or_else(|| ApiError::not_found("Command not found"))?;

    if !cmd.is_global && cmd.created_by != user_id {
        return Err(ApiError::forbidden("Not authorized"));
    }
    if !cmd.enabled {
        return Err(ApiError::bad_request("Command is disabled"));
    }

    let mut ctx = InterpolationContext {
        input: req.input.clone(),
        user_id: user_id.clone(),
        channel_id: req.channel_id.clone(),
        ..Default::default()
    };
    if let Some(user) = state.db.get_user_by_id(&user_id)? {
        ctx.username = user.username;
        ctx.display_name = user.display_name;
    }
    if !req.channel_id.is_empty() {
        if let Some(channel) = state.db.get_channel(&req.channel_id)? {
            ctx.channel_name = channel.name;
        }
    }

    let result = run_http_request(&state, &cmd, &ctx).await;

    // The invoking user's identity is used for the post-back, matching the
    // original behavior.
    if cmd.response_mode == "channel" && result.success && !req.channel_id.is_empty() {
        if let Err(e) = post_result_to_channel(&state, &req.channel_id, &user_id, &cmd.name, &result).await
        {
            warn!("Failed to post command result: {:#}", e);
        }
    }

    Ok(Json(result))
}

/// Builds the outbound request from the interpolated templates and runs it
/// with the 30-second timeout, reading at most 1 MiB of body.
async fn run_http_request(
    state: &AppState,
    cmd: &CustomCommand,
    ctx: &InterpolationContext,
) -> CommandExecutionResult {
    let url = interpolate_url(&cmd.url, ctx);

    let mut request = match cmd.method.as_str() {
        "POST" => {
            let mut builder = state.http.post(&url);
            if !cmd.body_template.is_empty() {
                builder = builder.body(interpolate(&cmd.body_template, ctx));
            }
            builder
        }
        _ => state.http.get(&url),
    };

    let mut has_content_type = false;
    if !cmd.headers.is_empty() {
        if let Ok(headers) = serde_json::from_str::<std::collections::HashMap<String, String>>(
            &cmd.headers,
        ) {
            for (name, value) in headers {
                if name.eq_ignore_ascii_case("content-type") {
                    has_content_type = true;
                }
                request = request.header(name, interpolate(&value, ctx));
            }
        }
    }
    if cmd.method == "POST" && !has_content_type {
        request = request.header(reqwest::header::CONTENT_TYPE, "application/json");
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            return CommandExecutionResult {
                success: false,
                status_code: 0,
                response_body: String::new(),
                error: format!("Request failed: {e}"),
            }
        }
    };

    let status = response.status().as_u16();
    let mut body = Vec::new();
    let mut stream = response;
    loop {
        match stream.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(BODY_LIMIT - body.len());
                body.extend_from_slice(&chunk[..take]);
                if body.len() >= BODY_LIMIT {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                return CommandExecutionResult {
                    success: false,
                    status_code: status,
                    response_body: String::new(),
                    error: format!("Failed to read response: {e}"),
                }
            }
        }
    }

    CommandExecutionResult {
        success: (200..300).contains(&status),
        status_code: status,
        response_body: String::from_utf8_lossy(&body).into_owned(),
        error: String::new(),
    }
}

async fn post_result_to_channel(
    state: &AppState,
    channel_id: &str,
    user_id: &str,
    cmd_name: &str,
    result: &CommandExecutionResult,
) -> anyhow::Result<()> {
    let mut body = result.response_body.clone();
    if body.len() > POSTBACK_LIMIT {
        let mut cut = POSTBACK_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("\n...(truncated)");
    }
    let content = format!("**/{cmd_name}** result:\n```\n{body}\n```");

    let msg = state.db.create_message(channel_id, user_id, &content, None)?;
    let user = state
        .db
        .get_user_by_id(user_id)?
        .ok_or_else(|| anyhow::anyhow!("user not found"))?;

    state
        .hub
        .broadcast_to_channel(
            channel_id,
            &WsEvent::NewMessage(MessageWithUser {
                message: msg,
                user: user.to_response(),
                reply_count: 0,
                latest_reply: None,
            }),
        )
        .await;

    Ok(())
}

/// Generates a command configuration from a natural-language description.
pub async fn ai_generate(
    State(state): State<AppState>,
    Json(req): Json<AiGenerateCommandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.description.is_empty() {
        return Err(ApiError::bad_request("Description is required"));
    }

    let client = state
        .mediator
        .client("openai")
        .filter(|c| c.is_configured())
        .ok_or_else(|| ApiError::unavailable("AI service not available"))?;

    let messages = vec![InputMessage::new("user", &req.description)];
    let response = client
        .get_response_with_context(&messages, prompts::command_builder())
        .await
        .map_err(|e| {
            warn!("Command generation failed: {:#}", e);
            ApiError::internal("AI generation failed")
        })?;

    // The model is told to reply with bare JSON; anything else is returned
    // as a preview for the user to inspect.
    #[derive(serde::Deserialize, Default)]
    #[serde(default)]
    struct GeneratedCommand {
        name: String,
        description: String,
        url: String,
        method: String,
        headers: String,
        body_template: String,
        response_mode: String,
        is_global: bool,
    }

    match serde_json::from_str::<GeneratedCommand>(&response) {
        Ok(generated) if !generated.name.is_empty() && !generated.url.is_empty() => {
            let now = chrono::Utc::now();
            Ok(Json(AiGenerateCommandResponse {
                command: Some(CustomCommand {
                    id: String::new(),
                    name: generated.name,
                    description: generated.description,
                    url: generated.url,
                    method: if generated.method.is_empty() {
                        "GET".into()
                    } else {
                        generated.method
                    },
                    headers: generated.headers,
                    body_template: generated.body_template,
                    is_global: generated.is_global,
                    created_by: String::new(),
                    response_mode: if generated.response_mode.is_empty() {
                        "private".into()
                    } else {
                        generated.response_mode
                    },
                    enabled: true,
                    created_at: now,
                    updated_at: now,
                }),
                preview: "Generated command configuration ready for review.".into(),
            }))
        }
        _ => Ok(Json(AiGenerateCommandResponse {
            command: None,
            preview: response,
        })),
    }
}
