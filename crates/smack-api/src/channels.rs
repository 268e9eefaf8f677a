use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::json;

use smack_types::api::{CreateChannelRequest, CreateDmRequest, UpdateChannelRequest};
use smack_types::events::WsEvent;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

fn sanitize_name(name: &str) -> String {
    name.replace(' ', "-").to_lowercase()
}

pub async fn list(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.db.get_channels_for_user(&user_id)?))
}

pub async fn list_public(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.db.get_public_channels()?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::bad_request("Channel name is required"));
    }

    let channel =
        state
            .db
            .create_channel(&sanitize_name(&req.name), &req.description, &user_id, false)?;
    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = state
        .db
        .get_channel(&channel_id)?
        .ok_or_else(|| ApiError::not_found("Channel not found"))?;
    Ok(Json(channel))
}

pub async fn update(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Json(req): Json<UpdateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = state
        .db
        .get_channel(&channel_id)?
        .ok_or_else(|| ApiError::not_found("Channel not found"))?;
    if channel.is_direct {
        return Err(ApiError::bad_request("Cannot update direct message channels"));
    }

    let name = match &req.name {
        Some(name) if !name.is_empty() => sanitize_name(name),
        _ => channel.name,
    };
    let description = req.description.unwrap_or(channel.description);

    state.db.update_channel(&channel_id, &name, &description)?;

    let updated = state
        .db
        .get_channel(&channel_id)?
        .ok_or_else(|| ApiError::not_found("Channel not found"))?;

    state
        .hub
        .broadcast_to_channel(&channel_id, &WsEvent::ChannelUpdate(updated.clone()))
        .await;

    Ok(Json(updated))
}

pub async fn join(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = state
        .db
        .get_channel(&channel_id)?
        .ok_or_else(|| ApiError::not_found("Channel not found"))?;
    if channel.is_direct {
        return Err(ApiError::bad_request("Cannot join direct message channel"));
    }

    state.db.join_channel(&channel_id, &user_id)?;
    Ok(Json(json!({ "status": "joined" })))
}

pub async fn leave(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = state
        .db
        .get_channel(&channel_id)?
        .ok_or_else(|| ApiError::not_found("Channel not found"))?;
    if channel.name == "general" {
        return Err(ApiError::bad_request("Cannot leave the general channel"));
    }

    state.db.leave_channel(&channel_id, &user_id)?;
    Ok(Json(json!({ "status": "left" })))
}

pub async fn members(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let members = state.db.get_channel_members(&channel_id)?;
    let responses: Vec<_> = members.iter().map(|m| m.to_response()).collect();
    Ok(Json(responses))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.mark_channel_read(&channel_id, &user_id)?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn mute(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.mute_channel(&user_id, &channel_id)?;
    Ok(Json(json!({ "status": "muted" })))
}

pub async fn unmute(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.unmute_channel(&user_id, &channel_id)?;
    Ok(Json(json!({ "status": "unmuted" })))
}

pub async fn muted(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.db.get_muted_channels(&user_id)?))
}

pub async fn clear(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.clear_channel_messages(&channel_id)?;
    Ok(Json(json!({ "status": "cleared" })))
}

pub async fn create_dm(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateDmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.user_id.is_empty() {
        return Err(ApiError::bad_request("User ID is required"));
    }
    if req.user_id == user_id {
        return Err(ApiError::bad_request("Cannot create DM with yourself"));
    }

    let channel = state.db.get_or_create_dm_channel(&user_id, &req.user_id)?;
    Ok(Json(channel))
}
