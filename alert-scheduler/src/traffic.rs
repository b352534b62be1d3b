//! Platform traffic totals from two tiers: the durable aggregate store is
//! ground truth, the hourly cache only fills gaps the aggregation job has not
//! reached yet. Results from the two are never added together.

use std::sync::Arc;

use alert_core::ports::{TrafficCache, TrafficStore};
use alert_core::types::{sum_positive, Granularity};
use alert_core::Clock;
use anyhow::Result;
use chrono::{DateTime, Duration, Timelike, Utc};

pub struct TrafficAggregator {
    store: Arc<dyn TrafficStore>,
    cache: Arc<dyn TrafficCache>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

fn truncate_to_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

impl TrafficAggregator {
    pub fn new(
        store: Arc<dyn TrafficStore>,
        cache: Arc<dyn TrafficCache>,
        clock: Arc<dyn Clock>,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            retention,
        }
    }

    /// Total bytes moved across the platform in `[start, end]`.
    pub async fn get_platform_traffic(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let primary = self
            .store
            .get_platform_total_usage(Granularity::Daily, start, end)
            .await?
            .total;
        if primary > 0 {
            return Ok(primary);
        }

        let boundary = self.clock.now() - self.retention;
        if end < boundary {
            tracing::debug!(%start, %end, "No durable traffic and window is past cache retention");
            return Ok(0);
        }

        let from = start.max(boundary);
        let total = self.sum_cache(from, end).await;
        tracing::debug!(%from, %end, total, "Durable traffic empty, used hourly cache");
        Ok(total)
    }

    async fn sum_cache(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
        let mut total = 0u64;
        let mut hour = truncate_to_hour(from);
        while hour <= to {
            match self.cache.get_all_hourly_traffic(hour).await {
                Ok(entries) => {
                    total = total.saturating_add(sum_positive(entries.iter().map(|e| e.as_pair())));
                }
                Err(e) => {
                    tracing::warn!(%hour, "Failed to read hourly traffic cache: {:#}", e);
                }
            }
            hour += Duration::hours(1);
        }
        total
    }
}
