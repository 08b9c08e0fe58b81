use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod directory;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod refresh_store;
pub mod repo;
pub mod repo_types;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
