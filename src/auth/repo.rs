use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::{Permission, Role, User};
use crate::store::StoreError;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    /// `Conflict` when the username is taken.
    async fn create(
        &self,
        username: &str,
        display_name: &str,
        password_hash: &str,
    ) -> Result<User, StoreError>;
    async fn touch_last_login(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn find_role(&self, id: Uuid) -> Result<Option<Role>, StoreError>;
    async fn find_permission(&self, id: Uuid) -> Result<Option<Permission>, StoreError>;
}

const USER_SELECT: &str = r#"
    SELECT u.id, u.username, u.display_name, u.password_hash, u.is_active,
           COALESCE(array_agg(ur.role_id) FILTER (WHERE ur.role_id IS NOT NULL), '{}') AS role_ids,
           u.last_login, u.created_at
    FROM users u
    LEFT JOIN user_roles ur ON ur.user_id = u.id
"#;

#[derive(Clone)]
pub struct PgAuthRepo {
    db: PgPool,
}

impl PgAuthRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgAuthRepo {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("{USER_SELECT} WHERE u.username = $1 GROUP BY u.id");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("{USER_SELECT} WHERE u.id = $1 GROUP BY u.id");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn create(
        &self,
        username: &str,
        display_name: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, display_name, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, display_name, password_hash, is_active,
                      '{}'::uuid[] AS role_ids, last_login, created_at
            "#,
        )
        .bind(username)
        .bind(display_name)
        .bind(password_hash)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn touch_last_login(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(r#"UPDATE users SET last_login = now(), updated_at = now() WHERE id = $1"#)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RoleStore for PgAuthRepo {
    async fn find_role(&self, id: Uuid) -> Result<Option<Role>, StoreError> {
        let role = sqlx::query_as::<_, Role>(
            r#"
            SELECT r.id, r.name,
                   COALESCE(array_agg(rp.permission_id) FILTER (WHERE rp.permission_id IS NOT NULL), '{}') AS permission_ids
            FROM roles r
            LEFT JOIN role_permissions rp ON rp.role_id = r.id
            WHERE r.id = $1
            GROUP BY r.id
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(role)
    }

    async fn find_permission(&self, id: Uuid) -> Result<Option<Permission>, StoreError> {
        let permission =
            sqlx::query_as::<_, Permission>(r#"SELECT id, name FROM permissions WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&self.db)
                .await?;
        Ok(permission)
    }
}
