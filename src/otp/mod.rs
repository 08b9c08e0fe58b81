//! One-time passcodes: generation, flood control, delivery and single-use
//! validation.

use crate::state::AppState;
use axum::Router;

pub mod delivery;
pub mod engine;
pub mod generator;
pub mod handlers;
pub mod rate_limiter;
pub mod repo;
pub mod repo_types;

pub fn router() -> Router<AppState> {
    handlers::otp_routes()
}
