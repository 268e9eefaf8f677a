use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use smack_types::api::{AuthResponse, LoginRequest, RegisterRequest};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;
use crate::token;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.is_empty() || req.display_name.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request(
            "Username, display name, and password are required",
        ));
    }
    if req.password.len() < 6 {
        return Err(ApiError::bad_request(
            "Password must be at least 6 characters",
        ));
    }

    // All blocking work (store lookups + argon2 hashing) off the runtime.
    let state = state.clone();
    let (user, session) = tokio::task::spawn_blocking(move || {
        if state.db.get_user_by_username(&req.username)?.is_some() {
            return Ok(None);
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?
            .to_string();

        let user = state.db.create_user(&req.username, &req.display_name, &hash)?;
        let session = token::create_session(&state.db, &user.id)?;
        anyhow::Ok(Some((user, session)))
    })
    .await??
    .ok_or_else(|| ApiError::conflict("Username already taken"))?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token: session,
            user: user.to_response(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let state = state.clone();
    let result = tokio::task::spawn_blocking(move || {
        let Some(user) = state.db.get_user_by_username(&req.username)? else {
            return anyhow::Ok(None);
        };

        // Bot and webhook users carry an empty hash and cannot log in.
        if user.password_hash.is_empty() {
            return Ok(None);
        }
        let Ok(parsed) = PasswordHash::new(&user.password_hash) else {
            return Ok(None);
        };
        if Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed)
            .is_err()
        {
            return Ok(None);
        }

        state.db.update_user_status(&user.id, "online")?;
        let session = token::create_session(&state.db, &user.id)?;
        Ok(Some((user, session)))
    })
    .await??;

    let (user, session) = result.ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    Ok(Json(AuthResponse {
        token: session,
        user: user.to_response(),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_id(&user_id)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user.to_response()))
}
