use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fleet resource families watched for liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Node,
    Agent,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Node => "node",
            ResourceKind::Agent => "agent",
        }
    }

    pub fn offline_alert(&self) -> AlertKind {
        match self {
            ResourceKind::Node => AlertKind::NodeOffline,
            ResourceKind::Agent => AlertKind::AgentOffline,
        }
    }

    pub fn online_alert(&self) -> AlertKind {
        match self {
            ResourceKind::Node => AlertKind::NodeOnline,
            ResourceKind::Agent => AlertKind::AgentOnline,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every notification kind a binding can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    NodeOffline,
    NodeOnline,
    AgentOffline,
    AgentOnline,
    NewUser,
    PaymentSuccess,
    DailySummary,
    WeeklySummary,
    ResourceExpiring,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::NodeOffline => "node_offline",
            AlertKind::NodeOnline => "node_online",
            AlertKind::AgentOffline => "agent_offline",
            AlertKind::AgentOnline => "agent_online",
            AlertKind::NewUser => "new_user",
            AlertKind::PaymentSuccess => "payment_success",
            AlertKind::DailySummary => "daily_summary",
            AlertKind::WeeklySummary => "weekly_summary",
            AlertKind::ResourceExpiring => "resource_expiring",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-seen view of a node or forward agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessRecord {
    pub id: i64,
    pub sid: String,
    pub name: String,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub mute_notification: bool,
    pub enabled: bool,
}

impl LivenessRecord {
    /// `None` for resources that never reported.
    pub fn offline_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_seen_at.map(|seen| now - seen)
    }

    pub fn is_online(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.enabled && matches!(self.offline_for(now), Some(d) if d <= window)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiringResource {
    pub id: i64,
    pub sid: String,
    pub name: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total: u64,
}

/// One entry of the short-TTL hourly cache. Counters arrive signed and may be
/// garbage; consumers only accumulate positive values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyTraffic {
    pub upload: i64,
    pub download: i64,
}

impl HourlyTraffic {
    pub fn as_pair(&self) -> (i64, i64) {
        (self.upload, self.download)
    }
}

/// Adds the positive parts of each (upload, download) pair, saturating
/// instead of wrapping.
pub fn sum_positive<I: IntoIterator<Item = (i64, i64)>>(rows: I) -> u64 {
    rows.into_iter().fold(0u64, |acc, (upload, download)| {
        acc.saturating_add(upload.max(0) as u64)
            .saturating_add(download.max(0) as u64)
    })
}

/// Minimal projection used when counting account creations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUserEvent {
    pub user_id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub payment_id: i64,
    pub user_email: String,
    pub plan_name: String,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub paid_at: DateTime<Utc>,
}
