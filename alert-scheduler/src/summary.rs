//! Daily and weekly platform summaries.
//!
//! Bindings are loaded for the current business hour (and weekday, for
//! weekly) and then filtered by calendar dedup: a binding gets at most one
//! daily summary per business day and one weekly summary per week boundary.
//! Bookkeeping moves only for bindings whose message was delivered.

use std::sync::Arc;

use alert_core::binding::Binding;
use alert_core::calendar::Period;
use alert_core::ports::{AccountSource, BindingRepository, LivenessSource};
use alert_core::types::{CreatedRecord, LivenessRecord};
use alert_core::{BusinessCalendar, Clock};
use alert_delivery::render::{FleetStatus, SummarySnapshot, WeeklyComparison};
use alert_delivery::{render, Delivery, DispatchReport, Dispatcher, OutboundMessage};
use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{settle, SchedulerError};
use crate::traffic::TrafficAggregator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryReport {
    pub due: usize,
    pub sent: usize,
    pub blocked: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    Daily,
    Weekly,
}

impl Cadence {
    fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum AccountTable {
    Users,
    Subscriptions,
}

/// Percentage change from `previous` to `current`. A zero baseline reads as
/// 0% while still zero and 100% once anything shows up.
pub fn percent_change(current: u64, previous: u64) -> f64 {
    if previous == 0 {
        return if current == 0 { 0.0 } else { 100.0 };
    }
    (current as f64 - previous as f64) / previous as f64 * 100.0
}

pub struct SummaryScheduler {
    bindings: Arc<dyn BindingRepository>,
    accounts: Arc<dyn AccountSource>,
    liveness: Arc<dyn LivenessSource>,
    traffic: Arc<TrafficAggregator>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    page_size: i64,
    liveness_window: chrono::Duration,
}

impl SummaryScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bindings: Arc<dyn BindingRepository>,
        accounts: Arc<dyn AccountSource>,
        liveness: Arc<dyn LivenessSource>,
        traffic: Arc<TrafficAggregator>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
        page_size: i64,
        liveness_window: chrono::Duration,
    ) -> Self {
        Self {
            bindings,
            accounts,
            liveness,
            traffic,
            dispatcher,
            clock,
            calendar,
            page_size: page_size.max(1),
            liveness_window,
        }
    }

    pub async fn send_daily(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SummaryReport, SchedulerError> {
        self.run(Cadence::Daily, cancel).await
    }

    pub async fn send_weekly(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SummaryReport, SchedulerError> {
        self.run(Cadence::Weekly, cancel).await
    }

    async fn run(
        &self,
        cadence: Cadence,
        cancel: &CancellationToken,
    ) -> Result<SummaryReport, SchedulerError> {
        let job = cadence.as_str();
        let now = self.clock.now();
        let mut report = SummaryReport::default();

        let candidates = match self.candidates(cadence, now).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(cadence = job, "Failed to load summary bindings: {:#}", e);
                return settle(job, report, 0, vec![format!("binding lookup: {e:#}")]);
            }
        };

        let mut due: Vec<Binding> = candidates
            .into_iter()
            .filter(|b| match cadence {
                Cadence::Daily => b.daily_summary_due(&self.calendar, now),
                Cadence::Weekly => b.weekly_summary_due(&self.calendar, now),
            })
            .collect();
        report.due = due.len();
        if due.is_empty() {
            tracing::debug!(cadence = job, "No summaries due this tick");
            return Ok(report);
        }

        let message = match self.compose(cadence, now).await {
            Ok(m) => Arc::new(m),
            Err(e) => {
                tracing::error!(cadence = job, "Failed to gather summary data: {:#}", e);
                return settle(job, report, 0, vec![format!("gather: {e:#}")]);
            }
        };

        let deliveries = due
            .iter()
            .map(|b| Delivery {
                binding_id: b.id,
                recipient: b.telegram_user_id,
                message: Arc::clone(&message),
            })
            .collect();
        let dispatch = self.dispatcher.dispatch(deliveries, cancel).await;
        report.sent = dispatch.sent();
        report.blocked = dispatch.blocked();
        report.errors = dispatch.errors();

        self.record_sent(cadence, &mut due, &dispatch, now).await;

        tracing::info!(
            cadence = job,
            due = report.due,
            sent = report.sent,
            blocked = report.blocked,
            errors = report.errors,
            "Summary run finished"
        );
        Ok(report)
    }

    async fn candidates(&self, cadence: Cadence, now: DateTime<Utc>) -> Result<Vec<Binding>> {
        let hour = self.calendar.hour(now);
        match cadence {
            Cadence::Daily => self.bindings.find_for_daily_summary(hour).await,
            Cadence::Weekly => {
                self.bindings
                    .find_for_weekly_summary(hour, self.calendar.weekday(now))
                    .await
            }
        }
    }

    async fn compose(&self, cadence: Cadence, now: DateTime<Utc>) -> Result<OutboundMessage> {
        match cadence {
            Cadence::Daily => {
                let period = self.calendar.previous_days(now, 1);
                let snapshot = self.gather(period, now).await?;
                Ok(render::daily_summary(&self.calendar, &snapshot))
            }
            Cadence::Weekly => {
                let period = self.calendar.previous_days(now, 7);
                let current = self.gather(period, now).await?;
                let previous = self.gather(self.calendar.preceding(&period), now).await?;
                let comparison = WeeklyComparison {
                    users_change_pct: percent_change(current.new_users, previous.new_users),
                    subscriptions_change_pct: percent_change(
                        current.new_subscriptions,
                        previous.new_subscriptions,
                    ),
                    traffic_change_pct: percent_change(
                        current.traffic_bytes,
                        previous.traffic_bytes,
                    ),
                };
                Ok(render::weekly_summary(&self.calendar, &current, &comparison))
            }
        }
    }

    /// Counts and totals for one closed period. Fleet status is "as of now"
    /// regardless of the period.
    pub async fn gather(&self, period: Period, now: DateTime<Utc>) -> Result<SummarySnapshot> {
        let new_users = self.count_created(AccountTable::Users, &period).await?;
        let new_subscriptions = self.count_created(AccountTable::Subscriptions, &period).await?;

        let nodes = self.liveness.list_nodes().await?;
        let agents = self.liveness.list_agents().await?;
        let (nodes_online, nodes_offline) = self.split_liveness(&nodes, now);
        let (agents_online, agents_offline) = self.split_liveness(&agents, now);

        let traffic = self.traffic.get_platform_traffic(period.start, period.end).await;
        let traffic_bytes = match traffic {
            Ok(total) => total,
            Err(e) => {
                tracing::warn!(
                    start = %period.start,
                    end = %period.end,
                    "Traffic unavailable, reporting zero: {:#}",
                    e
                );
                0
            }
        };

        Ok(SummarySnapshot {
            period,
            new_users,
            new_subscriptions,
            fleet: FleetStatus {
                nodes_online,
                nodes_offline,
                agents_online,
                agents_offline,
            },
            traffic_bytes,
        })
    }

    fn split_liveness(&self, records: &[LivenessRecord], now: DateTime<Utc>) -> (usize, usize) {
        let enabled = records.iter().filter(|r| r.enabled);
        let online = enabled
            .clone()
            .filter(|r| r.is_online(now, self.liveness_window))
            .count();
        (online, enabled.count() - online)
    }

    async fn count_created(&self, table: AccountTable, period: &Period) -> Result<u64> {
        let mut count = 0u64;
        let mut offset = 0i64;
        loop {
            let page: Vec<CreatedRecord> = match table {
                AccountTable::Users => {
                    self.accounts
                        .users_created_between(period.start, period.end, offset, self.page_size)
                        .await?
                }
                AccountTable::Subscriptions => {
                    self.accounts
                        .subscriptions_created_between(
                            period.start,
                            period.end,
                            offset,
                            self.page_size,
                        )
                        .await?
                }
            };
            count += page.iter().filter(|r| period.contains(r.created_at)).count() as u64;
            if (page.len() as i64) < self.page_size {
                return Ok(count);
            }
            offset += self.page_size;
        }
    }

    async fn record_sent(
        &self,
        cadence: Cadence,
        due: &mut [Binding],
        dispatch: &DispatchReport,
        now: DateTime<Utc>,
    ) {
        for id in dispatch.sent_binding_ids() {
            let Some(binding) = due.iter_mut().find(|b| b.id == id) else {
                continue;
            };
            let moved = match cadence {
                Cadence::Daily => binding.record_daily_summary_sent(now),
                Cadence::Weekly => binding.record_weekly_summary_sent(now),
            };
            if !moved {
                continue;
            }
            if let Err(e) = self.bindings.update(binding).await {
                tracing::warn!(
                    binding_id = id,
                    cadence = cadence.as_str(),
                    "Failed to persist summary bookkeeping: {:#}",
                    e
                );
            }
        }
    }
}
