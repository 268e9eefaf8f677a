use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::json;

use smack_types::api::{CreateWebhookRequest, IncomingWebhookRequest, WebhookResponse};
use smack_types::events::WsEvent;
use smack_types::models::MessageWithUser;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

const WIDGET_SIZES: &[&str] = &["small", "medium", "large", "xlarge"];

pub async fn create(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }
    if req.channel_id.is_empty() {
        return Err(ApiError::bad_request("Channel ID is required"));
    }

    let channel = state
        .db
        .get_channel(&req.channel_id)?
        .ok_or_else(|| ApiError::not_found("Channel not found"))?;
    if channel.is_direct {
        return Err(ApiError::bad_request(
            "Cannot create webhooks for direct message channels",
        ));
    }

    let webhook = state.db.create_webhook(&req.name, &req.channel_id, &user_id)?;

    let url = format!("/api/webhooks/incoming/{}/{}", webhook.id, webhook.token);
    Ok((
        StatusCode::CREATED,
        Json(WebhookResponse {
            id: webhook.id,
            name: webhook.name,
            channel_id: webhook.channel_id,
            token: webhook.token,
            created_by: webhook.created_by,
            created_at: webhook.created_at,
            url,
        }),
    ))
}

#[derive(serde::Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    channel_id: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let webhooks = match query.channel_id {
        Some(channel_id) if !channel_id.is_empty() => {
            state.db.get_webhooks_for_channel(&channel_id)?
        }
        _ => state.db.get_webhooks_by_user(&user_id)?,
    };
    Ok(Json(webhooks))
}

pub async fn get(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let webhook = state
        .db
        .get_webhook(&webhook_id)?
        .ok_or_else(|| ApiError::not_found("Webhook not found"))?;
    Ok(Json(webhook))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.delete_webhook(&webhook_id, &user_id)?;
    Ok(Json(json!({ "message": "webhook deleted" })))
}

/// Public ingress: no bearer, the (id, token) URL pair is the capability.
/// The posting identity is a synthesized per-webhook user.
pub async fn incoming(
    State(state): State<AppState>,
    Path((webhook_id, token)): Path<(String, String)>,
    Json(req): Json<IncomingWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let webhook = state
        .db
        .get_webhook_by_token(&webhook_id, &token)?
        .ok_or_else(|| ApiError::not_found("Webhook not found or invalid token"))?;

    if req.content.is_empty() && req.html.is_empty() {
        return Err(ApiError::bad_request("Content or HTML is required"));
    }
    if !req.widget_size.is_empty() && !WIDGET_SIZES.contains(&req.widget_size.as_str()) {
        return Err(ApiError::bad_request(
            "widget_size must be small, medium, large, or xlarge",
        ));
    }

    let webhook_user_id = format!("webhook-{}", webhook.id);
    let display_name = if req.username.is_empty() {
        webhook.name.clone()
    } else {
        req.username.clone()
    };
    state.db.ensure_bot_user(
        &webhook_user_id,
        &format!("webhook-{}", webhook.name),
        &display_name,
        &req.avatar_url,
    )?;

    // HTML-only posts get a placeholder so content stays non-empty.
    let content = if req.content.is_empty() {
        "[HTML Widget]".to_string()
    } else {
        req.content.clone()
    };
    let html = (!req.html.is_empty()).then_some(req.html.as_str());
    let widget_size = (!req.widget_size.is_empty()).then_some(req.widget_size.as_str());

    let msg = state.db.create_message_with_html(
        &webhook.channel_id,
        &webhook_user_id,
        &content,
        html,
        widget_size,
        None,
    )?;

    let user = state
        .db
        .get_user_by_id(&webhook_user_id)?
        .ok_or_else(|| ApiError::internal("Webhook user missing"))?;

    let with_user = MessageWithUser {
        message: msg.clone(),
        user: user.to_response(),
        reply_count: 0,
        latest_reply: None,
    };
    state
        .hub
        .broadcast_to_channel(&webhook.channel_id, &WsEvent::NewMessage(with_user))
        .await;

    Ok(Json(json!({
        "id": msg.id,
        "channel_id": msg.channel_id,
        "content": msg.content,
        "created_at": msg.created_at.to_rfc3339(),
    })))
}
