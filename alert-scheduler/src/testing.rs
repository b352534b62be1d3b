//! In-memory collaborators for multi-step checker scenarios.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alert_core::binding::{Binding, NewBinding};
use alert_core::ports::{
    AccountSource, BindingRepository, ExpirySource, LivenessSource, MessageAction,
    MessageChannel, TrafficCache, TrafficStore,
};
use alert_core::types::{
    AlertKind, CreatedRecord, ExpiringResource, Granularity, HourlyTraffic, LivenessRecord,
    UsageSummary,
};
use alert_core::{BusinessCalendar, ChannelError, ManualClock};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};

pub fn cal() -> BusinessCalendar {
    BusinessCalendar::new(FixedOffset::east_opt(8 * 3600).unwrap())
}

/// Wall-clock instant expressed in business time (UTC+8).
pub fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    cal()
        .tz()
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn binding(id: i64, recipient: i64) -> Binding {
    let new = NewBinding::new(format!("tgb_{id}"), id, recipient, None, "en").unwrap();
    Binding::from((id, new, local(2026, 1, 1, 0, 0)))
}

pub fn resource(id: i64, last_seen_at: Option<DateTime<Utc>>) -> LivenessRecord {
    LivenessRecord {
        id,
        sid: format!("res_{id}"),
        name: format!("resource-{id}"),
        last_seen_at,
        mute_notification: false,
        enabled: true,
    }
}

pub fn manual_clock(now: DateTime<Utc>) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(now))
}

#[derive(Default)]
pub struct FakeBindings {
    rows: Mutex<Vec<Binding>>,
    fail_lookups: AtomicBool,
    pub updates: AtomicUsize,
}

impl FakeBindings {
    pub fn with(rows: Vec<Binding>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            ..Default::default()
        })
    }

    pub fn fail_lookups(&self) {
        self.fail_lookups.store(true, Ordering::SeqCst);
    }

    pub fn row(&self, id: i64) -> Binding {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .unwrap()
    }

    fn select(&self, pred: impl Fn(&Binding) -> bool) -> Result<Vec<Binding>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(anyhow!("binding store unavailable"));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|b| !b.is_deleted() && pred(b))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BindingRepository for FakeBindings {
    async fn create(&self, new: NewBinding) -> Result<Binding> {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.iter().map(|b| b.id).max().unwrap_or(0) + 1;
        let binding = Binding::from((id, new, local(2026, 1, 1, 0, 0)));
        rows.push(binding.clone());
        Ok(binding)
    }

    async fn get(&self, id: i64) -> Result<Option<Binding>> {
        Ok(self.select(|b| b.id == id)?.into_iter().next())
    }

    async fn find_by_subscriber(&self, user_id: i64) -> Result<Vec<Binding>> {
        self.select(|b| b.user_id == user_id)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(b) = rows.iter_mut().find(|b| b.id == id) {
            b.deleted_at = Some(b.updated_at);
        }
        Ok(())
    }

    async fn update(&self, binding: &Binding) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let slot = rows
            .iter_mut()
            .find(|b| b.id == binding.id)
            .ok_or_else(|| anyhow!("binding {} missing", binding.id))?;
        *slot = binding.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_for_notification(&self, kind: AlertKind) -> Result<Vec<Binding>> {
        self.select(|b| b.is_enabled(kind))
    }

    async fn find_for_daily_summary(&self, hour: u32) -> Result<Vec<Binding>> {
        self.select(|b| b.notify_daily_summary && b.daily_summary_hour == hour as i32)
    }

    async fn find_for_weekly_summary(&self, hour: u32, weekday: u32) -> Result<Vec<Binding>> {
        self.select(|b| {
            b.notify_weekly_summary
                && b.weekly_summary_hour == hour as i32
                && b.weekly_summary_weekday == weekday as i32
        })
    }
}

#[derive(Default)]
pub struct FakeFleet {
    pub nodes: Mutex<Vec<LivenessRecord>>,
    pub agents: Mutex<Vec<LivenessRecord>>,
    pub expiring_nodes: Mutex<Vec<ExpiringResource>>,
    pub expiring_agents: Mutex<Vec<ExpiringResource>>,
    pub fail: AtomicBool,
    pub expiry_queries: AtomicUsize,
}

impl FakeFleet {
    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("fleet store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl LivenessSource for FakeFleet {
    async fn list_nodes(&self) -> Result<Vec<LivenessRecord>> {
        self.check()?;
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn list_agents(&self) -> Result<Vec<LivenessRecord>> {
        self.check()?;
        Ok(self.agents.lock().unwrap().clone())
    }
}

fn until_filter(
    rows: &Mutex<Vec<ExpiringResource>>,
    until: DateTime<Utc>,
) -> Vec<ExpiringResource> {
    rows.lock()
        .unwrap()
        .iter()
        .filter(|r| r.expires_at <= until)
        .cloned()
        .collect()
}

#[async_trait]
impl ExpirySource for FakeFleet {
    async fn find_expiring_nodes(&self, until: DateTime<Utc>) -> Result<Vec<ExpiringResource>> {
        self.expiry_queries.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(until_filter(&self.expiring_nodes, until))
    }

    async fn find_expiring_agents(&self, until: DateTime<Utc>) -> Result<Vec<ExpiringResource>> {
        self.expiry_queries.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(until_filter(&self.expiring_agents, until))
    }
}

#[derive(Default)]
pub struct FakeAccounts {
    pub users: Vec<CreatedRecord>,
    pub subscriptions: Vec<CreatedRecord>,
    pub pages_read: AtomicUsize,
}

impl FakeAccounts {
    fn page(
        &self,
        rows: &[CreatedRecord],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Vec<CreatedRecord> {
        self.pages_read.fetch_add(1, Ordering::SeqCst);
        rows.iter()
            .filter(|r| r.created_at >= start && r.created_at <= end)
            .skip(offset as usize)
            .take(limit as usize)
            .copied()
            .collect()
    }
}

#[async_trait]
impl AccountSource for FakeAccounts {
    async fn users_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CreatedRecord>> {
        Ok(self.page(&self.users, start, end, offset, limit))
    }

    async fn subscriptions_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CreatedRecord>> {
        Ok(self.page(&self.subscriptions, start, end, offset, limit))
    }
}

/// Durable store returning fixed totals keyed by window start.
#[derive(Default)]
pub struct FakeTrafficStore {
    pub totals: HashMap<DateTime<Utc>, u64>,
}

#[async_trait]
impl TrafficStore for FakeTrafficStore {
    async fn get_platform_total_usage(
        &self,
        _granularity: Granularity,
        start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<UsageSummary> {
        Ok(UsageSummary {
            total: self.totals.get(&start).copied().unwrap_or(0),
        })
    }
}

#[derive(Default)]
pub struct EmptyTrafficCache;

#[async_trait]
impl TrafficCache for EmptyTrafficCache {
    async fn get_all_hourly_traffic(&self, _hour: DateTime<Utc>) -> Result<Vec<HourlyTraffic>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FailMode {
    Blocked,
    Transport,
}

/// Channel recording every delivered message; recipients can be set to fail.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(i64, String, Option<MessageAction>)>>,
    failing: Mutex<HashMap<i64, FailMode>>,
}

impl RecordingChannel {
    pub fn fail(&self, recipient: i64, mode: FailMode) {
        self.failing.lock().unwrap().insert(recipient, mode);
    }

    pub fn recover(&self, recipient: i64) {
        self.failing.lock().unwrap().remove(&recipient);
    }

    pub fn recipients(&self) -> Vec<i64> {
        self.sent.lock().unwrap().iter().map(|(r, _, _)| *r).collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t, _)| t.clone()).collect()
    }

    fn deliver(
        &self,
        recipient: i64,
        text: &str,
        action: Option<&MessageAction>,
    ) -> Result<(), ChannelError> {
        match self.failing.lock().unwrap().get(&recipient) {
            Some(FailMode::Blocked) => Err(ChannelError::Blocked {
                recipient,
                reason: "bot was blocked by the user".into(),
            }),
            Some(FailMode::Transport) => Err(ChannelError::Transport("connection reset".into())),
            None => {
                self.sent
                    .lock()
                    .unwrap()
                    .push((recipient, text.to_string(), action.cloned()));
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn send_message(&self, recipient: i64, text: &str) -> Result<(), ChannelError> {
        self.deliver(recipient, text, None)
    }

    async fn send_message_with_action(
        &self,
        recipient: i64,
        text: &str,
        action: &MessageAction,
    ) -> Result<(), ChannelError> {
        self.deliver(recipient, text, Some(action))
    }
}
