use std::collections::HashMap;
use std::sync::Arc;

use alert_core::binding::Binding;
use alert_core::ports::{BindingRepository, ExpirySource};
use alert_core::types::{AlertKind, ExpiringResource};
use alert_core::{BusinessCalendar, Clock};
use alert_delivery::render::{self, ExpiringItem};
use alert_delivery::{Delivery, Dispatcher};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{settle, SchedulerError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiringReport {
    pub due: usize,
    /// Due bindings with nothing expiring inside their window.
    pub empty: usize,
    pub sent: usize,
    pub errors: usize,
    pub query_errors: usize,
}

/// Once-per-business-day digest of nodes and agents about to expire.
pub struct ExpiringResourceChecker {
    bindings: Arc<dyn BindingRepository>,
    expiry: Arc<dyn ExpirySource>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
}

type Digest = (Vec<ExpiringItem>, Vec<ExpiringItem>);

impl ExpiringResourceChecker {
    pub fn new(
        bindings: Arc<dyn BindingRepository>,
        expiry: Arc<dyn ExpirySource>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
    ) -> Self {
        Self {
            bindings,
            expiry,
            dispatcher,
            clock,
            calendar,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<ExpiringReport, SchedulerError> {
        let now = self.clock.now();
        let mut report = ExpiringReport::default();

        let bindings = match self
            .bindings
            .find_for_notification(AlertKind::ResourceExpiring)
            .await
        {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Failed to load bindings for expiry digest: {:#}", e);
                return settle("expiring", report, 0, vec![format!("binding lookup: {e:#}")]);
            }
        };

        let mut due: Vec<Binding> = bindings
            .into_iter()
            .filter(|b| b.resource_expiring_due(&self.calendar, now))
            .collect();
        report.due = due.len();

        // Bindings sharing a window share one pair of queries. A failed
        // window is remembered as `None` and not retried this tick.
        let mut digests: HashMap<i32, Option<Digest>> = HashMap::new();
        let mut failures = Vec::new();
        let mut deliveries = Vec::new();

        for binding in &due {
            let days = binding.resource_expiring_days;
            if !digests.contains_key(&days) {
                let digest = match self.digest(now, days).await {
                    Ok(d) => Some(d),
                    Err(e) => {
                        tracing::warn!(days, "Failed to query expiring resources: {:#}", e);
                        report.query_errors += 1;
                        failures.push(format!("expiry query ({days}d): {e:#}"));
                        None
                    }
                };
                digests.insert(days, digest);
            }
            let Some(Some((agents, nodes))) = digests.get(&days) else {
                continue;
            };
            if agents.is_empty() && nodes.is_empty() {
                report.empty += 1;
                continue;
            }
            deliveries.push(Delivery {
                binding_id: binding.id,
                recipient: binding.telegram_user_id,
                message: Arc::new(render::expiring_digest(agents, nodes)),
            });
        }

        let dispatch = self.dispatcher.dispatch(deliveries, cancel).await;
        report.sent = dispatch.sent();
        report.errors = dispatch.errors();

        let today = self.calendar.date(now);
        for id in dispatch.sent_binding_ids() {
            let Some(binding) = due.iter_mut().find(|b| b.id == id) else {
                continue;
            };
            if binding.record_resource_expiring_sent(today) {
                if let Err(e) = self.bindings.update(binding).await {
                    tracing::warn!(
                        binding_id = id,
                        "Failed to persist expiry bookkeeping: {:#}",
                        e
                    );
                }
            }
        }

        tracing::info!(
            due = report.due,
            empty = report.empty,
            sent = report.sent,
            errors = report.errors,
            "Expiry digest run finished"
        );
        let successes = report.sent + report.empty;
        settle("expiring", report, successes, failures)
    }

    /// Agents and nodes expiring no later than the end of the business day
    /// `days` from today.
    async fn digest(&self, now: DateTime<Utc>, days: i32) -> Result<Digest> {
        let last_day = self.calendar.date(now) + Duration::days(i64::from(days) + 1);
        let until = self.calendar.start_of_day(last_day) - Duration::nanoseconds(1);

        let agents = self.expiry.find_expiring_agents(until).await?;
        let nodes = self.expiry.find_expiring_nodes(until).await?;
        Ok((self.items(now, agents), self.items(now, nodes)))
    }

    fn items(&self, now: DateTime<Utc>, resources: Vec<ExpiringResource>) -> Vec<ExpiringItem> {
        let mut items: Vec<ExpiringItem> = resources
            .into_iter()
            .map(|r| ExpiringItem {
                days_remaining: self.calendar.days_until(now, r.expires_at),
                sid: r.sid,
                name: r.name,
            })
            .collect();
        items.sort_by_key(|i| i.days_remaining);
        items
    }
}
