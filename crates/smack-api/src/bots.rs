use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};

use smack_types::api::CreateBotDmRequest;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.db.get_all_bots()?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bot = state
        .db
        .get_bot(&bot_id)?
        .ok_or_else(|| ApiError::not_found("Bot not found"))?;
    Ok(Json(bot))
}

/// Opens (or returns) the caller's DM channel with a bot. The binding this
/// creates is what routes the AI mediator into the channel.
pub async fn create_dm(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateBotDmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.bot_id.is_empty() {
        return Err(ApiError::bad_request("Bot ID is required"));
    }

    let bot = state
        .db
        .get_bot(&req.bot_id)?
        .ok_or_else(|| ApiError::not_found("Bot not found"))?;

    let mut channel = state.db.get_or_create_bot_dm_channel(&user_id, &req.bot_id)?;
    channel.name = bot.display_name;

    Ok(Json(channel))
}
