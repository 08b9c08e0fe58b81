//! Sliding-window send limiter backed by an expiring counter store.
//!
//! The counter's own expiry bounds the window; there is no timestamp list.
//! A missing key means no sends in the current window (fail open), a store
//! error propagates (fail closed).

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::store::StoreError;

const KEY_PREFIX: &str = "otp:";

/// Atomic counter store with per-key expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increments `key` and returns the new count.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
    /// `None` when the key is absent or already expired.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: i64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limit: i64) -> Self {
        Self { store, limit }
    }

    pub async fn can_send(&self, receiver: &str) -> Result<bool, StoreError> {
        match self.store.get(&key_for(receiver)).await? {
            None => Ok(true),
            Some(count) => Ok(count < self.limit),
        }
    }

    /// Expiry is reset on every call so a crash between the two steps heals
    /// within one window.
    pub async fn mark_send(&self, receiver: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = key_for(receiver);
        let count = self.store.increment(&key).await?;
        self.store.set_expiry(&key, ttl).await?;
        debug!(%receiver, count, "otp send recorded");
        Ok(())
    }
}

fn key_for(receiver: &str) -> String {
    format!("{KEY_PREFIX}{receiver}")
}


/// Counters kept in the `rate_counters` table.
#[derive(Clone)]
pub struct PgCounterStore {
    db: PgPool,
}

impl PgCounterStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        // Single statement: concurrent callers are serialized on the row lock.
        let count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO rate_counters (key, count, expires_at)
            VALUES ($1, 1, NULL)
            ON CONFLICT (key) DO UPDATE SET
                count = CASE
                    WHEN rate_counters.expires_at IS NOT NULL AND rate_counters.expires_at <= now()
                    THEN 1
                    ELSE rate_counters.count + 1
                END,
                expires_at = CASE
                    WHEN rate_counters.expires_at IS NOT NULL AND rate_counters.expires_at <= now()
                    THEN NULL
                    ELSE rate_counters.expires_at
                END
            RETURNING count
            "#,
        )
        .bind(key)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE rate_counters
            SET expires_at = now() + make_interval(secs => $2)
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(ttl.as_secs_f64())
        .execute(&self.db)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT count
            FROM rate_counters
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(count)
    }
}
