use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        claims::AccessClaims,
        extractors::AuthUser,
        password::{hash_password, verify_password},
        repo_types::User,
    },
    error::ApiError,
    state::AppState,
    store::StoreError,
};

const INVALID_CREDENTIALS: &str = "invalid credentials";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// Derives claims from the user's current roles, signs both tokens and
/// records the refresh `jti`.
async fn issue_session(state: &AppState, user: &User) -> Result<AuthResponse, ApiError> {
    let access = state.directory.resolve(&user.role_ids).await?;

    let (access_token, access_expires_at) = state.issuer.issue_access_token(
        user.id,
        &user.username,
        access.roles.clone(),
        access.permissions.clone(),
    )?;
    let (refresh_token, refresh_expires_at, jti) =
        state.issuer.issue_refresh_token(user.id, &user.username)?;
    state
        .refresh_tokens
        .put(jti, user.id, refresh_expires_at)
        .await?;

    Ok(AuthResponse {
        access_token,
        access_expires_at,
        refresh_token,
        refresh_expires_at,
        user: PublicUser {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            roles: access.roles,
            permissions: access.permissions,
        },
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let username = payload.username.trim();
    if !(3..=64).contains(&username.chars().count()) {
        warn!("username length out of range");
        return Err(ApiError::BadRequest("username must be 3 to 64 characters".into()));
    }
    if payload.password.len() < 8 {
        warn!(%username, "password too short");
        return Err(ApiError::BadRequest("password too short".into()));
    }
    let display_name = payload
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(username);

    let hash = hash_password(&payload.password).map_err(|e| ApiError::Internal(e.to_string()))?;
    let user = match state.users.create(username, display_name, &hash).await {
        Ok(u) => u,
        Err(StoreError::Conflict) => {
            warn!(%username, "username already registered");
            return Err(ApiError::Store(StoreError::Conflict));
        }
        Err(e) => return Err(e.into()),
    };

    let session = issue_session(&state, &user).await?;
    info!(user_id = %user.id, %username, "user registered");
    Ok((StatusCode::CREATED, Json(session)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let username = payload.username.trim();

    let Some(user) = state.users.find_by_username(username).await? else {
        warn!(%username, "login for unknown username");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
    };

    let ok = verify_password(&payload.password, &user.password_hash).map_err(|e| {
        error!(user_id = %user.id, error = %e, "stored hash unusable");
        ApiError::Internal(e.to_string())
    })?;
    if !ok {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
    }
    if !user.is_active {
        warn!(user_id = %user.id, "login for inactive user");
        return Err(ApiError::Unauthorized("account disabled"));
    }

    let session = issue_session(&state, &user).await?;
    if let Err(e) = state.users.touch_last_login(user.id).await {
        warn!(user_id = %user.id, error = %e, "last_login update failed");
    }

    info!(user_id = %user.id, "user logged in");
    Ok(Json(session))
}

/// Rotates the refresh token: the presented one is consumed and a new pair
/// is minted with claims derived from the user's current roles.
#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let claims = state.issuer.verify_refresh_token(&payload.refresh_token)?;

    if !state.refresh_tokens.exists(claims.jti).await? {
        warn!(user_id = %claims.sub, jti = %claims.jti, "refresh token not on record");
        return Err(ApiError::Unauthorized("refresh token revoked"));
    }
    // A concurrent rotation of the same token loses here.
    if !state.refresh_tokens.delete(claims.jti).await? {
        warn!(user_id = %claims.sub, jti = %claims.jti, "refresh token already rotated");
        return Err(ApiError::Unauthorized("refresh token revoked"));
    }

    let user = match state.users.find_by_id(claims.sub).await? {
        Some(u) if u.is_active => u,
        _ => {
            warn!(user_id = %claims.sub, "refresh for missing or inactive user");
            return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
        }
    };

    let session = issue_session(&state, &user).await?;
    info!(user_id = %user.id, "tokens refreshed");
    Ok(Json(session))
}

#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<StatusCode, ApiError> {
    let claims = state.issuer.verify_refresh_token(&payload.refresh_token)?;
    let removed = state.refresh_tokens.delete(claims.jti).await?;
    info!(user_id = %claims.sub, removed, "user logged out");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(claims), fields(user_id = %claims.sub))]
pub async fn me(AuthUser(claims): AuthUser) -> Json<AccessClaims> {
    Json(claims)
}
