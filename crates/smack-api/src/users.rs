use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::json;

use smack_types::api::{UpdateProfileRequest, UpdateStatusRequest};
use smack_types::models::UserResponse;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let users = state.db.get_all_users()?;
    let responses: Vec<UserResponse> = users.iter().map(|u| u.to_response()).collect();
    Ok(Json(responses))
}

pub async fn get(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_id(&user_id)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user.to_response()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(display_name) = &req.display_name {
        state.db.update_user_display_name(&user_id, display_name)?;
    }
    if let Some(avatar_url) = &req.avatar_url {
        state.db.update_user_avatar(&user_id, avatar_url)?;
    }

    let user = state
        .db
        .get_user_by_id(&user_id)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user.to_response()))
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !matches!(req.status.as_str(), "online" | "away" | "offline" | "dnd") {
        return Err(ApiError::bad_request(
            "Invalid status. Use: online, away, offline, or dnd",
        ));
    }

    state.db.update_user_status(&user_id, &req.status)?;
    Ok(Json(json!({ "status": req.status })))
}
