use axum::{
    extract::State,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::repo_types::{OtpType, Receiver};
use crate::{auth::extractors::AuthUser, error::ApiError, state::AppState};

const MANAGE_PERMISSION: &str = "otp.manage";

pub fn otp_routes() -> Router<AppState> {
    Router::new()
        .route("/otp/request", post(request_code))
        .route("/otp/validate", post(validate_code))
        .route("/otp/sweep", post(sweep_expired))
}

#[derive(Debug, Deserialize)]
pub struct RequestCodeRequest {
    pub receiver: String,
    pub otp_type: OtpType,
}

#[derive(Debug, Serialize)]
pub struct RequestCodeResponse {
    pub message: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct ValidateCodeRequest {
    pub receiver: String,
    pub otp_type: OtpType,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateCodeResponse {
    pub valid: bool,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub removed: u64,
}

fn parse_receiver(raw: &str) -> Result<Receiver, ApiError> {
    Receiver::parse(raw).map_err(|e| {
        warn!("unparseable receiver");
        ApiError::BadRequest(e.to_string())
    })
}

#[instrument(skip(state, payload), fields(otp_type = %payload.otp_type))]
pub async fn request_code(
    State(state): State<AppState>,
    Json(payload): Json<RequestCodeRequest>,
) -> Result<Json<RequestCodeResponse>, ApiError> {
    let receiver = parse_receiver(&payload.receiver)?;
    let record = state.otp.request_code(&receiver, payload.otp_type).await?;

    Ok(Json(RequestCodeResponse {
        message: "code sent",
        expires_at: record.expires_at,
    }))
}

#[instrument(skip(state, payload), fields(otp_type = %payload.otp_type))]
pub async fn validate_code(
    State(state): State<AppState>,
    Json(payload): Json<ValidateCodeRequest>,
) -> Result<Json<ValidateCodeResponse>, ApiError> {
    let receiver = parse_receiver(&payload.receiver)?;
    let code = payload.code.trim();
    if code.is_empty() {
        return Err(ApiError::BadRequest("code is required".into()));
    }

    state
        .otp
        .validate_code(&receiver, payload.otp_type, code)
        .await?;
    Ok(Json(ValidateCodeResponse { valid: true }))
}

#[instrument(skip(state, claims), fields(user_id = %claims.sub))]
pub async fn sweep_expired(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<SweepResponse>, ApiError> {
    claims.require_permission(MANAGE_PERMISSION)?;
    let removed = state.otp.sweep_expired().await?;
    info!(removed, "manual otp sweep");
    Ok(Json(SweepResponse { removed }))
}
