use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use smack_types::api::ReactionRequest;
use smack_types::events::WsEvent;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

pub async fn add(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<ReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.message_id.is_empty() || req.emoji.is_empty() {
        return Err(ApiError::bad_request("Message ID and emoji are required"));
    }

    let msg = state
        .db
        .get_message(&req.message_id)?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;

    let reaction = state.db.add_reaction(&req.message_id, &user_id, &req.emoji)?;
    broadcast_reaction_update(&state, &msg.channel_id, &req.message_id).await?;

    Ok(Json(reaction))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<ReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.message_id.is_empty() || req.emoji.is_empty() {
        return Err(ApiError::bad_request("Message ID and emoji are required"));
    }

    let msg = state
        .db
        .get_message(&req.message_id)?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;

    state.db.remove_reaction(&req.message_id, &user_id, &req.emoji)?;
    broadcast_reaction_update(&state, &msg.channel_id, &req.message_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn for_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.db.get_reactions_for_message(&message_id)?))
}

/// Both add and remove rebroadcast the full regrouped set so clients never
/// have to reconcile increments.
async fn broadcast_reaction_update(
    state: &AppState,
    channel_id: &str,
    message_id: &str,
) -> Result<(), ApiError> {
    let reactions = state.db.get_reactions_for_message(message_id)?;
    state
        .hub
        .broadcast_to_channel(
            channel_id,
            &WsEvent::ReactionUpdate {
                message_id: message_id.to_string(),
                reactions,
            },
        )
        .await;
    Ok(())
}
