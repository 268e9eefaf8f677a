use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::DateTime;
use serde_json::json;

use smack_types::api::{
    AddBoardMemberRequest, CreateBoardRequest, CreateCardRequest, CreateColumnRequest,
    CreateCommentRequest, CreateLabelRequest, MoveCardRequest, ReorderColumnsRequest,
    UpdateBoardRequest, UpdateCardRequest, UpdateColumnRequest,
};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

fn require_member(state: &AppState, board_id: &str, user_id: &str) -> Result<(), ApiError> {
    if state.db.is_board_member(board_id, user_id)? {
        Ok(())
    } else {
        Err(ApiError::forbidden("Not a member of this board"))
    }
}

fn require_manager(state: &AppState, board_id: &str, user_id: &str) -> Result<(), ApiError> {
    match state.db.get_board_member_role(board_id, user_id)? {
        Some(role) if role == "owner" || role == "admin" => Ok(()),
        Some(_) => Err(ApiError::forbidden("Not authorized")),
        None => Err(ApiError::forbidden("Not a member of this board")),
    }
}

fn parse_due_date(raw: Option<&str>) -> Result<Option<chrono::DateTime<chrono::Utc>>, ApiError> {
    match raw {
        None => Ok(None),
        Some("") => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.to_utc()))
            .map_err(|_| ApiError::bad_request("Invalid due date")),
    }
}

// -- Boards --

pub async fn list_boards(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.db.get_boards_for_user(&user_id)?))
}

pub async fn create_board(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::bad_request("Board name is required"));
    }
    let board = state
        .db
        .create_board(&req.name, &req.description, &req.icon, &user_id)?;
    Ok((StatusCode::CREATED, Json(board)))
}

pub async fn get_board(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &board_id, &user_id)?;

    let board = state
        .db
        .get_board(&board_id)?
        .ok_or_else(|| ApiError::not_found("Board not found"))?;
    let columns = state.db.get_columns_with_cards(&board_id)?;
    let labels = state.db.get_labels_for_board(&board_id)?;

    let mut body = serde_json::to_value(&board).map_err(anyhow::Error::from)?;
    body["columns"] = serde_json::to_value(columns).map_err(anyhow::Error::from)?;
    body["labels"] = serde_json::to_value(labels).map_err(anyhow::Error::from)?;
    Ok(Json(body))
}

pub async fn update_board(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<UpdateBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_manager(&state, &board_id, &user_id)?;

    let board = state
        .db
        .get_board(&board_id)?
        .ok_or_else(|| ApiError::not_found("Board not found"))?;

    let name = req.name.filter(|n| !n.is_empty()).unwrap_or(board.name);
    let description = req.description.unwrap_or(board.description);
    state
        .db
        .update_board(&board_id, &name, &description, req.icon.as_deref())?;

    let updated = state
        .db
        .get_board(&board_id)?
        .ok_or_else(|| ApiError::not_found("Board not found"))?;
    Ok(Json(updated))
}

pub async fn delete_board(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    match state.db.get_board_member_role(&board_id, &user_id)? {
        Some(role) if role == "owner" => {}
        _ => return Err(ApiError::forbidden("Only the owner can delete a board")),
    }

    state.db.delete_board(&board_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Members --

pub async fn board_members(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &board_id, &user_id)?;
    Ok(Json(state.db.get_board_members(&board_id)?))
}

pub async fn add_board_member(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<AddBoardMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_manager(&state, &board_id, &user_id)?;

    let role = match req.role.as_str() {
        "admin" => "admin",
        _ => "member",
    };
    state.db.add_board_member(&board_id, &req.user_id, role)?;
    Ok(StatusCode::CREATED)
}

pub async fn remove_board_member(
    State(state): State<AppState>,
    Path((board_id, target_user_id)): Path<(String, String)>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_manager(&state, &board_id, &user_id)?;

    // The owner is never removable through this path.
    if state.db.get_board_member_role(&board_id, &target_user_id)?.as_deref() == Some("owner") {
        return Err(ApiError::bad_request("Cannot remove board owner"));
    }

    state.db.remove_board_member(&board_id, &target_user_id)?;
    Ok(Json(json!({ "status": "removed" })))
}

// -- Columns --

pub async fn create_column(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateColumnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &board_id, &user_id)?;
    if req.name.is_empty() {
        return Err(ApiError::bad_request("Column name is required"));
    }

    let column = state.db.create_column(&board_id, &req.name, req.position)?;
    Ok((StatusCode::CREATED, Json(column)))
}

pub async fn update_column(
    State(state): State<AppState>,
    Path(column_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<UpdateColumnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let column = state
        .db
        .get_column(&column_id)?
        .ok_or_else(|| ApiError::not_found("Column not found"))?;
    require_member(&state, &column.board_id, &user_id)?;

    if req.name.is_empty() {
        return Err(ApiError::bad_request("Column name is required"));
    }
    state.db.update_column(&column_id, &req.name)?;

    let updated = state
        .db
        .get_column(&column_id)?
        .ok_or_else(|| ApiError::not_found("Column not found"))?;
    Ok(Json(updated))
}

pub async fn delete_column(
    State(state): State<AppState>,
    Path(column_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let column = state
        .db
        .get_column(&column_id)?
        .ok_or_else(|| ApiError::not_found("Column not found"))?;
    require_member(&state, &column.board_id, &user_id)?;

    state.db.delete_column(&column_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reorder_columns(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<ReorderColumnsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &board_id, &user_id)?;
    state.db.reorder_columns(&board_id, &req.column_ids)?;
    Ok(Json(json!({ "status": "reordered" })))
}

// -- Cards --

pub async fn create_card(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateCardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &board_id, &user_id)?;
    if req.title.is_empty() {
        return Err(ApiError::bad_request("Card title is required"));
    }
    if req.column_id.is_empty() {
        return Err(ApiError::bad_request("Column ID is required"));
    }

    let due_date = parse_due_date(req.due_date.as_deref())?;
    let card = state.db.create_card(
        &req.column_id,
        &board_id,
        &req.title,
        &req.description,
        &user_id,
        due_date,
    )?;
    Ok((StatusCode::CREATED, Json(card)))
}

pub async fn get_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let details = state
        .db
        .get_card_with_details(&card_id)?
        .ok_or_else(|| ApiError::not_found("Card not found"))?;
    require_member(&state, &details.card.board_id, &user_id)?;
    Ok(Json(details))
}

pub async fn update_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<UpdateCardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let card = state
        .db
        .get_card(&card_id)?
        .ok_or_else(|| ApiError::not_found("Card not found"))?;
    require_member(&state, &card.board_id, &user_id)?;

    let title = req.title.filter(|t| !t.is_empty()).unwrap_or(card.title);
    let description = req.description.unwrap_or(card.description);
    let due_date = match req.due_date.as_deref() {
        Some(raw) => parse_due_date(Some(raw))?,
        None => card.due_date,
    };
    state.db.update_card(&card_id, &title, &description, due_date)?;

    if let Some(assignees) = &req.assignee_ids {
        state.db.set_card_assignees(&card_id, assignees)?;
    }
    if let Some(labels) = &req.label_ids {
        state.db.set_card_labels(&card_id, labels)?;
    }

    let updated = state
        .db
        .get_card_with_details(&card_id)?
        .ok_or_else(|| ApiError::not_found("Card not found"))?;
    Ok(Json(updated))
}

pub async fn delete_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let card = state
        .db
        .get_card(&card_id)?
        .ok_or_else(|| ApiError::not_found("Card not found"))?;
    require_member(&state, &card.board_id, &user_id)?;

    state.db.delete_card(&card_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn move_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<MoveCardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let card = state
        .db
        .get_card(&card_id)?
        .ok_or_else(|| ApiError::not_found("Card not found"))?;
    require_member(&state, &card.board_id, &user_id)?;

    state.db.move_card(&card_id, &req.column_id, req.position)?;

    let updated = state
        .db
        .get_card_with_details(&card_id)?
        .ok_or_else(|| ApiError::not_found("Card not found"))?;
    Ok(Json(updated))
}

// -- Labels --

pub async fn board_labels(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &board_id, &user_id)?;
    Ok(Json(state.db.get_labels_for_board(&board_id)?))
}

pub async fn create_label(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateLabelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &board_id, &user_id)?;
    if req.name.is_empty() || req.color.is_empty() {
        return Err(ApiError::bad_request("Label name and color are required"));
    }

    let label = state.db.create_label(&board_id, &req.name, &req.color)?;
    Ok((StatusCode::CREATED, Json(label)))
}

pub async fn update_label(
    State(state): State<AppState>,
    Path(label_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateLabelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let label = state
        .db
        .get_label(&label_id)?
        .ok_or_else(|| ApiError::not_found("Label not found"))?;
    require_member(&state, &label.board_id, &user_id)?;

    state.db.update_label(&label_id, &req.name, &req.color)?;

    let updated = state
        .db
        .get_label(&label_id)?
        .ok_or_else(|| ApiError::not_found("Label not found"))?;
    Ok(Json(updated))
}

pub async fn delete_label(
    State(state): State<AppState>,
    Path(label_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let label = state
        .db
        .get_label(&label_id)?
        .ok_or_else(|| ApiError::not_found("Label not found"))?;
    require_member(&state, &label.board_id, &user_id)?;

    state.db.delete_label(&label_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Comments --

pub async fn card_comments(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let card = state
        .db
        .get_card(&card_id)?
        .ok_or_else(|| ApiError::not_found("Card not found"))?;
    require_member(&state, &card.board_id, &user_id)?;

    Ok(Json(state.db.get_comments_for_card(&card_id)?))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let card = state
        .db
        .get_card(&card_id)?
        .ok_or_else(|| ApiError::not_found("Card not found"))?;
    require_member(&state, &card.board_id, &user_id)?;

    if req.content.is_empty() {
        return Err(ApiError::bad_request("Comment content is required"));
    }

    let comment = state.db.create_kanban_comment(&card_id, &user_id, &req.content)?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<String>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state
        .db
        .get_kanban_comment(&comment_id)?
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;
    if comment.user_id != user_id {
        return Err(ApiError::forbidden("You can only delete your own comments"));
    }

    state.db.delete_kanban_comment(&comment_id)?;
    Ok(StatusCode::NO_CONTENT)
}
