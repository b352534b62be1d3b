use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alert_core::ports::{AlertDeduplicator, BindingRepository};
use alert_core::types::{LivenessRecord, ResourceKind};
use alert_core::{BusinessCalendar, Clock};
use alert_delivery::{render, Delivery, Dispatcher};
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{settle, SchedulerError};

/// Remembers which resources were offline on the previous observation so a
/// later scan can spot the ones that came back.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    offline_since: HashMap<(ResourceKind, i64), DateTime<Utc>>,
}

impl LivenessTracker {
    /// Returns resources that were offline last time and are online now,
    /// paired with their last-seen instant before the outage. Resources that
    /// never reported are neither online nor offline.
    pub fn observe(
        &mut self,
        kind: ResourceKind,
        records: &[LivenessRecord],
        now: DateTime<Utc>,
        window: Duration,
    ) -> Vec<(LivenessRecord, DateTime<Utc>)> {
        let mut back = Vec::new();
        let mut seen = HashSet::new();

        for record in records.iter().filter(|r| r.enabled) {
            let Some(last_seen) = record.last_seen_at else {
                continue;
            };
            let key = (kind, record.id);
            seen.insert(key);
            if record.is_online(now, window) {
                if let Some(since) = self.offline_since.remove(&key) {
                    back.push((record.clone(), since));
                }
            } else {
                self.offline_since.entry(key).or_insert(last_seen);
            }
        }

        self.offline_since
            .retain(|(k, id), _| *k != kind || seen.contains(&(*k, *id)));
        back
    }

    pub fn offline_count(&self) -> usize {
        self.offline_since.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnlineReport {
    /// Inside the post-start quiet window.
    pub suppressed: bool,
    pub muted: bool,
    pub sent: usize,
    pub errors: usize,
}

/// Back-online notices. No dedup lock: each transition is reported once by
/// whoever observes it, except during the quiet window after start when the
/// whole fleet reconnects at once.
pub struct OnlineNotifier {
    bindings: Arc<dyn BindingRepository>,
    dedup: Arc<dyn AlertDeduplicator>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    started_at: DateTime<Utc>,
    startup_cooldown: Duration,
}

impl OnlineNotifier {
    pub fn new(
        bindings: Arc<dyn BindingRepository>,
        dedup: Arc<dyn AlertDeduplicator>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
        startup_cooldown: Duration,
    ) -> Self {
        let started_at = clock.now();
        Self {
            bindings,
            dedup,
            dispatcher,
            clock,
            calendar,
            started_at,
            startup_cooldown,
        }
    }

    fn in_startup_cooldown(&self, now: DateTime<Utc>) -> bool {
        now - self.started_at < self.startup_cooldown
    }

    pub async fn notify(
        &self,
        kind: ResourceKind,
        resource: &LivenessRecord,
        offline_since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<OnlineReport, SchedulerError> {
        let mut report = OnlineReport::default();

        // The outage is over; the next one should alert without waiting out
        // the cooldown.
        if let Err(e) = self.dedup.clear_alert(kind.offline_alert(), resource.id).await {
            tracing::warn!(
                %kind,
                resource_id = resource.id,
                "Failed to clear offline alert lock: {}",
                e
            );
        }

        let now = self.clock.now();
        if self.in_startup_cooldown(now) {
            tracing::debug!(
                %kind,
                resource_id = resource.id,
                "Online notice suppressed during startup cooldown"
            );
            report.suppressed = true;
            return Ok(report);
        }
        if resource.mute_notification {
            report.muted = true;
            return Ok(report);
        }

        let alert = kind.online_alert();
        let bindings = match self.bindings.find_for_notification(alert).await {
            Ok(bindings) => bindings,
            Err(e) => {
                tracing::error!(%kind, "Failed to load bindings for online notice: {:#}", e);
                return settle("online", report, 0, vec![format!("binding lookup: {e:#}")]);
            }
        };

        let message = Arc::new(render::online_notice(
            &self.calendar,
            kind,
            resource,
            offline_since,
            now,
        ));
        // Only subscribers whose own threshold the outage reached hear about
        // the recovery.
        let downtime = offline_since.map(|since| now - since);
        let deliveries = bindings
            .iter()
            .filter(|b| b.is_enabled(alert))
            .filter(|b| downtime.map_or(true, |d| b.offline_threshold_reached(d)))
            .map(|b| Delivery {
                binding_id: b.id,
                recipient: b.telegram_user_id,
                message: Arc::clone(&message),
            })
            .collect();

        let dispatch = self.dispatcher.dispatch(deliveries, cancel).await;
        report.sent = dispatch.sent();
        report.errors = dispatch.errors();
        tracing::info!(
            %kind,
            resource_id = resource.id,
            sent = report.sent,
            "Resource back online"
        );
        Ok(report)
    }
}
