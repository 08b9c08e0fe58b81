use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::StoreError;

/// Live refresh tokens, keyed by `jti`. Access tokens are never tracked.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn put(&self, jti: Uuid, user_id: Uuid, expires_at: OffsetDateTime)
        -> Result<(), StoreError>;
    /// False for unknown or expired entries.
    async fn exists(&self, jti: Uuid) -> Result<bool, StoreError>;
    /// Returns whether an entry was removed. Only one of several concurrent
    /// callers sees `true`.
    async fn delete(&self, jti: Uuid) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct PgRefreshStore {
    db: PgPool,
}

impl PgRefreshStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshStore {
    async fn put(
        &self,
        jti: Uuid,
        user_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (jti, user_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(jti)
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn exists(&self, jti: Uuid) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (SELECT 1 FROM refresh_tokens WHERE jti = $1 AND expires_at > now())"#,
        )
        .bind(jti)
        .fetch_one(&self.db)
        .await?;
        Ok(found)
    }

    async fn delete(&self, jti: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query(r#"DELETE FROM refresh_tokens WHERE jti = $1"#)
            .bind(jti)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
