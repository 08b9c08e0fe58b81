use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::jwt::TokenError;
use crate::otp::engine::OtpError;
use crate::store::StoreError;

/// Shared by both code lookup failures so a caller cannot learn which
/// receivers hold live codes.
const UNKNOWN_CODE: &str = "invalid or unknown code";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Otp(#[from] OtpError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("missing permission: {0}")]
    Forbidden(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String) {
        match self {
            ApiError::Otp(e) => match e {
                OtpError::RateLimited | OtpError::QuotaExceeded => {
                    (StatusCode::TOO_MANY_REQUESTS, e.to_string())
                }
                OtpError::NotFound | OtpError::InvalidCode => {
                    (StatusCode::BAD_REQUEST, UNKNOWN_CODE.into())
                }
                OtpError::Expired => (StatusCode::BAD_REQUEST, e.to_string()),
                OtpError::AlreadyUsed => (StatusCode::CONFLICT, e.to_string()),
                OtpError::DeliveryFailed(_) => {
                    (StatusCode::BAD_GATEWAY, "code delivery failed".into())
                }
                OtpError::Store(s) => store_parts(s),
            },
            ApiError::Token(TokenError::Signing(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "token signing failed".into())
            }
            ApiError::Token(e) => (StatusCode::UNAUTHORIZED, e.to_string()),
            ApiError::Store(s) => store_parts(s),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, (*msg).into()),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.parts().0
    }
}

fn store_parts(e: &StoreError) -> (StatusCode, String) {
    match e {
        StoreError::NotFound => (StatusCode::NOT_FOUND, e.to_string()),
        StoreError::Conflict => (StatusCode::CONFLICT, e.to_string()),
        StoreError::Unavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "service temporarily unavailable".into(),
        ),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.parts();
        if status.is_server_error() {
            error!(%status, error = %self, "request failed");
        } else {
            warn!(%status, error = %self, "request rejected");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
