//! Sweep throttling.
//!
//! A lease answers "may this caller sweep now?" and records the attempt.
//! The process-local lease bounds sweeps per instance; the Postgres lease
//! bounds them across every instance sharing the database.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::store::StoreError;

#[async_trait]
pub trait SweepLease: Send + Sync {
    /// Take the lease if nobody took it within the last `interval`.
    async fn try_acquire(&self, now: DateTime<Utc>, interval: Duration) -> Result<bool, StoreError>;
}

/// Per-process throttle.
#[derive(Debug, Default)]
pub struct LocalLease {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl LocalLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SweepLease for LocalLease {
    async fn try_acquire(&self, now: DateTime<Utc>, interval: Duration) -> Result<bool, StoreError> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(at) if now - at < interval => Ok(false),
            _ => {
                *last = Some(now);
                Ok(true)
            }
        }
    }
}

/// Lease row in `sweep_leases`, taken with a conditional upsert.
#[derive(Debug, Clone)]
pub struct PgSweepLease {
    pool: PgPool,
    name: String,
    holder: String,
}

impl PgSweepLease {
    pub fn new(pool: PgPool, name: impl Into<String>, holder: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
            holder: holder.into(),
        }
    }
}

#[async_trait]
impl SweepLease for PgSweepLease {
    async fn try_acquire(&self, now: DateTime<Utc>, interval: Duration) -> Result<bool, StoreError> {
        let row: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO sweep_leases (name, holder, acquired_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE
                SET holder = EXCLUDED.holder, acquired_at = EXCLUDED.acquired_at
                WHERE sweep_leases.acquired_at <= $4
            RETURNING name
            "#,
        )
        .bind(&self.name)
        .bind(&self.holder)
        .bind(now)
        .bind(now - interval)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database("sweep_lease", e))?;
        Ok(row.is_some())
    }
}
