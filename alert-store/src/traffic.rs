use std::collections::HashMap;
use std::sync::Arc;

use alert_core::ports::{TrafficCache, TrafficStore};
use alert_core::redis::get_connection;
use alert_core::schema::subscription_usage_stats;
use alert_core::types::{sum_positive, Granularity, HourlyTraffic, UsageSummary};
use alert_core::{DbPool, RedisPool};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

/// Durable usage aggregates, keyed by business date.
pub struct PgTrafficStore {
    pool: Arc<DbPool>,
    tz: FixedOffset,
}

impl PgTrafficStore {
    pub fn new(pool: Arc<DbPool>, tz: FixedOffset) -> Self {
        Self { pool, tz }
    }
}

#[async_trait]
impl TrafficStore for PgTrafficStore {
    async fn get_platform_total_usage(
        &self,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UsageSummary> {
        let start_date = start.with_timezone(&self.tz).date_naive();
        let end_date = end.with_timezone(&self.tz).date_naive();

        let mut conn = self.pool.get().await?;
        let rows: Vec<(i64, i64)> = subscription_usage_stats::table
            .filter(subscription_usage_stats::granularity.eq(granularity.as_str()))
            .filter(subscription_usage_stats::period.ge(start_date))
            .filter(subscription_usage_stats::period.le(end_date))
            .select((
                subscription_usage_stats::upload,
                subscription_usage_stats::download,
            ))
            .load(&mut conn)
            .await?;

        let total = sum_positive(rows);
        tracing::debug!(
            granularity = granularity.as_str(),
            %start_date,
            %end_date,
            total,
            "Loaded platform usage from durable store"
        );
        Ok(UsageSummary { total })
    }
}

/// Hourly traffic hashes written by the agents' reporting path.
pub struct RedisTrafficCache {
    pool: RedisPool,
}

impl RedisTrafficCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    pub fn hour_key(hour: DateTime<Utc>) -> String {
        format!("traffic:hourly:{}", hour.format("%Y%m%d%H"))
    }
}

#[async_trait]
impl TrafficCache for RedisTrafficCache {
    async fn get_all_hourly_traffic(&self, hour: DateTime<Utc>) -> Result<Vec<HourlyTraffic>> {
        let mut conn = get_connection(&self.pool).await?;
        let key = Self::hour_key(hour);

        let entries: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&key)
            .query_async(&mut conn)
            .await?;

        let mut traffic = Vec::with_capacity(entries.len());
        for (field, raw) in entries {
            match serde_json::from_str::<HourlyTraffic>(&raw) {
                Ok(entry) => traffic.push(entry),
                Err(e) => {
                    tracing::debug!(%key, %field, "Skipping malformed hourly traffic entry: {}", e);
                }
            }
        }
        Ok(traffic)
    }
}
