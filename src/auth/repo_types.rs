use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record with its assigned role ids.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 PHC string
    pub is_active: bool,
    pub role_ids: Vec<Uuid>,
    pub last_login: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub permission_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
}
