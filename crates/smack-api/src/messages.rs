use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::DateTime;

use smack_types::api::{MessageQuery, ReplyRequest, SendMessageRequest, TtsRequest};
use smack_types::events::WsEvent;
use smack_types::models::MessageWithUser;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 100;

/// `limit` > 100 is clamped to 100; `limit` <= 0 falls back to 50.
fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(limit) if limit > MAX_PAGE => MAX_PAGE,
        Some(limit) if limit > 0 => limit,
        _ => DEFAULT_PAGE,
    }
}

pub async fn channel_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = clamp_limit(query.limit);
    let before = query
        .before
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.to_utc());

    let messages = state
        .db
        .get_channel_messages_before(&channel_id, limit, before)?;
    Ok(Json(messages))
}

pub async fn send(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.channel_id.is_empty() || req.content.is_empty() {
        return Err(ApiError::bad_request("Channel ID and content are required"));
    }

    // A reply must live in its parent's channel.
    if let Some(thread_id) = &req.thread_id {
        let parent = state
            .db
            .get_message(thread_id)?
            .ok_or_else(|| ApiError::not_found("Thread not found"))?;
        if parent.channel_id != req.channel_id {
            return Err(ApiError::bad_request(
                "Thread parent belongs to another channel",
            ));
        }
    }

    let msg = state
        .db
        .create_message(&req.channel_id, &user_id, &req.content, req.thread_id.as_deref())?;

    let user = state
        .db
        .get_user_by_id(&user_id)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let with_user = MessageWithUser {
        message: msg,
        user: user.to_response(),
        reply_count: 0,
        latest_reply: None,
    };

    state
        .hub
        .broadcast_to_channel(&req.channel_id, &WsEvent::NewMessage(with_user.clone()))
        .await;

    // The response never waits on a bot; the mediator classifies and
    // streams in a detached task.
    state
        .mediator
        .notify_user_message(req.channel_id.clone(), req.content.clone(), req.thread_id);

    Ok((StatusCode::CREATED, Json(with_user)))
}

pub async fn thread(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.db.get_thread_messages(&message_id)?))
}

pub async fn reply(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<ReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.is_empty() {
        return Err(ApiError::bad_request("Content is required"));
    }

    let parent = state
        .db
        .get_message(&message_id)?
        .ok_or_else(|| ApiError::not_found("Thread not found"))?;

    let msg = state.db.create_message(
        &parent.channel_id,
        &user_id,
        &req.content,
        Some(&message_id),
    )?;

    let user = state
        .db
        .get_user_by_id(&user_id)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let with_user = MessageWithUser {
        message: msg,
        user: user.to_response(),
        reply_count: 0,
        latest_reply: None,
    };

    state
        .hub
        .broadcast_to_channel(&parent.channel_id, &WsEvent::NewMessage(with_user.clone()))
        .await;

    Ok((StatusCode::CREATED, Json(with_user)))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let msg = state
        .db
        .get_message(&message_id)?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;

    if msg.user_id != user_id {
        return Err(ApiError::forbidden("You can only delete your own messages"));
    }

    state.db.delete_message(&message_id)?;

    state
        .hub
        .broadcast_to_channel(
            &msg.channel_id,
            &WsEvent::MessageDeleted {
                message_id,
                channel_id: msg.channel_id.clone(),
            },
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn text_to_speech(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.text.is_empty() {
        return Err(ApiError::bad_request("Text is required"));
    }
    if req.text.len() > 4096 {
        return Err(ApiError::bad_request("Text too long (max 4096 characters)"));
    }

    let client = state
        .mediator
        .any_configured_client()
        .ok_or_else(|| ApiError::unavailable("TTS not configured"))?;

    let audio = client
        .text_to_speech(&req.text, &req.voice)
        .await
        .map_err(|e| {
            tracing::error!("TTS failed: {:#}", e);
            ApiError::internal("Failed to generate speech")
        })?;

    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], audio))
}

#[cfg(test)]
mod tests {
    use super::clamp_limit;

    #[test]
    fn limits_clamp_to_the_window_bounds() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 50);
        assert_eq!(clamp_limit(Some(-3)), 50);
        assert_eq!(clamp_limit(Some(1)), 1);
        assert_eq!(clamp_limit(Some(100)), 100);
        assert_eq!(clamp_limit(Some(101)), 100);
        assert_eq!(clamp_limit(Some(10_000)), 100);
    }
}
