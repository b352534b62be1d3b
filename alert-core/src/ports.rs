//! Narrow interfaces the alerting subsystem consumes.
//!
//! Adapters live in `alert-store` and `alert-delivery`; checkers only ever
//! see these traits.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "mocks"))]
use mockall::automock;

use crate::binding::{Binding, NewBinding};
use crate::error::{ChannelError, DedupError};
use crate::types::{
    AlertKind, CreatedRecord, ExpiringResource, Granularity, HourlyTraffic, LivenessRecord,
    UsageSummary,
};

/// Fleet-wide "set if not exists with TTL" lock keyed by (kind, resource).
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait AlertDeduplicator: Send + Sync {
    /// Returns `true` for exactly one caller per key until `cooldown` elapses
    /// or the key is cleared.
    async fn try_acquire_alert_lock(
        &self,
        kind: AlertKind,
        resource_id: i64,
        cooldown: Duration,
    ) -> Result<bool, DedupError>;

    async fn clear_alert(&self, kind: AlertKind, resource_id: i64) -> Result<(), DedupError>;
}

#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait LivenessSource: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<LivenessRecord>>;
    async fn list_agents(&self) -> Result<Vec<LivenessRecord>>;
}

#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait ExpirySource: Send + Sync {
    /// Resources whose expiry is at or before `until`, including ones already
    /// expired.
    async fn find_expiring_nodes(&self, until: DateTime<Utc>) -> Result<Vec<ExpiringResource>>;
    async fn find_expiring_agents(&self, until: DateTime<Utc>) -> Result<Vec<ExpiringResource>>;
}

/// Paged views over account tables, used to count creations in a window.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn users_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CreatedRecord>>;

    async fn subscriptions_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CreatedRecord>>;
}

/// Durable, authoritative per-period usage aggregates.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait TrafficStore: Send + Sync {
    async fn get_platform_total_usage(
        &self,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UsageSummary>;
}

/// Short-TTL hourly counters, immediate but short-lived.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait TrafficCache: Send + Sync {
    async fn get_all_hourly_traffic(&self, hour: DateTime<Utc>) -> Result<Vec<HourlyTraffic>>;
}

#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait BindingRepository: Send + Sync {
    async fn create(&self, new: NewBinding) -> Result<Binding>;
    async fn get(&self, id: i64) -> Result<Option<Binding>>;
    async fn find_by_subscriber(&self, user_id: i64) -> Result<Vec<Binding>>;
    /// Logical delete; the binding disappears from every finder.
    async fn delete(&self, id: i64) -> Result<()>;
    /// Persists preferences and dedup bookkeeping.
    async fn update(&self, binding: &Binding) -> Result<()>;

    /// Live bindings with `kind` enabled.
    async fn find_for_notification(&self, kind: AlertKind) -> Result<Vec<Binding>>;
    async fn find_for_daily_summary(&self, hour: u32) -> Result<Vec<Binding>>;
    async fn find_for_weekly_summary(&self, hour: u32, weekday: u32) -> Result<Vec<Binding>>;
}

/// Inline action button attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAction {
    pub text: String,
    pub callback_data: String,
}

#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send_message(&self, recipient: i64, text: &str) -> Result<(), ChannelError>;

    async fn send_message_with_action(
        &self,
        recipient: i64,
        text: &str,
        action: &MessageAction,
    ) -> Result<(), ChannelError>;
}
