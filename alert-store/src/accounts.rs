use std::sync::Arc;

use alert_core::ports::AccountSource;
use alert_core::schema::{subscriptions, users};
use alert_core::types::CreatedRecord;
use alert_core::DbPool;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

pub struct PgAccountSource {
    pool: Arc<DbPool>,
}

impl PgAccountSource {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

fn records(rows: Vec<(i64, DateTime<Utc>)>) -> Vec<CreatedRecord> {
    rows.into_iter()
        .map(|(id, created_at)| CreatedRecord { id, created_at })
        .collect()
}

#[async_trait]
impl AccountSource for PgAccountSource {
    async fn users_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CreatedRecord>> {
        let mut conn = self.pool.get().await?;
        let rows = users::table
            .filter(users::created_at.ge(start))
            .filter(users::created_at.le(end))
            .order(users::id.asc())
            .offset(offset)
            .limit(limit)
            .select((users::id, users::created_at))
            .load(&mut conn)
            .await?;
        Ok(records(rows))
    }

    async fn subscriptions_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CreatedRecord>> {
        let mut conn = self.pool.get().await?;
        let rows = subscriptions::table
            .filter(subscriptions::created_at.ge(start))
            .filter(subscriptions::created_at.le(end))
            .order(subscriptions::id.asc())
            .offset(offset)
            .limit(limit)
            .select((subscriptions::id, subscriptions::created_at))
            .load(&mut conn)
            .await?;
        Ok(records(rows))
    }
}
