use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{OtpRecord, OtpRow, OtpType};
use crate::store::StoreError;

/// Persistence contract the engine relies on.
#[async_trait]
pub trait OtpStore: Send + Sync {
    async fn create(&self, record: &OtpRecord) -> Result<(), StoreError>;

    /// Latest record for (receiver, type, code), preferring unused ones. A
    /// used record is only returned when no unused one matches, so a replay
    /// can be reported as such.
    async fn find_latest_matching(
        &self,
        receiver: &str,
        otp_type: OtpType,
        code: &str,
    ) -> Result<Option<OtpRecord>, StoreError>;

    /// Flips `used` from false to true. `Ok(false)` when the record was
    /// already used, `NotFound` if the id is gone. Only one of several
    /// concurrent callers sees `Ok(true)`.
    async fn mark_used(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn count_by_receiver_and_type(
        &self,
        receiver: &str,
        otp_type: OtpType,
    ) -> Result<i64, StoreError>;

    /// Removes every record whose `expires_at` has passed; returns how many.
    async fn delete_expired(&self) -> Result<u64, StoreError>;
}

#[derive(Clone)]
pub struct PgOtpStore {
    db: PgPool,
}

impl PgOtpStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OtpStore for PgOtpStore {
    async fn create(&self, record: &OtpRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO otps (id, receiver, code, otp_type, used, send_at, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(&record.receiver)
        .bind(&record.code)
        .bind(record.otp_type.as_str())
        .bind(record.used)
        .bind(record.send_at)
        .bind(record.expires_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_latest_matching(
        &self,
        receiver: &str,
        otp_type: OtpType,
        code: &str,
    ) -> Result<Option<OtpRecord>, StoreError> {
        let row = sqlx::query_as::<_, OtpRow>(
            r#"
            SELECT id, receiver, code, otp_type, used, send_at, expires_at, created_at, updated_at
            FROM otps
            WHERE receiver = $1 AND otp_type = $2 AND code = $3
            ORDER BY used ASC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(receiver)
        .bind(otp_type.as_str())
        .bind(code)
        .fetch_optional(&self.db)
        .await?;

        row.map(OtpRecord::try_from)
            .transpose()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn mark_used(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE otps
            SET used = TRUE, updated_at = now()
            WHERE id = $1 AND used = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        if res.rows_affected() > 0 {
            return Ok(true);
        }

        let present: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM otps WHERE id = $1)"#)
                .bind(id)
                .fetch_one(&self.db)
                .await?;
        if present {
            Ok(false)
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn count_by_receiver_and_type(
        &self,
        receiver: &str,
        otp_type: OtpType,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM otps WHERE receiver = $1 AND otp_type = $2"#,
        )
        .bind(receiver)
        .bind(otp_type.as_str())
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn delete_expired(&self) -> Result<u64, StoreError> {
        let res = sqlx::query(r#"DELETE FROM otps WHERE expires_at < now()"#)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected())
    }
}
