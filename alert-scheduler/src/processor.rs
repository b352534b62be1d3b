//! Entry points an external timer drives. Each call is one tick: safe to
//! repeat on any cadence and from several instances at once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use alert_core::binding::{Binding, BindingPreferences, NewBinding};
use alert_core::config::AlertingConfig;
use alert_core::ports::{
    AccountSource, AlertDeduplicator, BindingRepository, ExpirySource, LivenessSource,
    MessageChannel, TrafficCache, TrafficStore,
};
use alert_core::types::{AlertKind, LivenessRecord, NewUserEvent, PaymentEvent, ResourceKind};
use alert_core::{BusinessCalendar, Clock};
use alert_delivery::{DispatchReport, Dispatcher};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::events::EventNotifier;
use crate::expiring::{ExpiringReport, ExpiringResourceChecker};
use crate::offline::{OfflineChecker, OfflineReport};
use crate::online::{LivenessTracker, OnlineNotifier, OnlineReport};
use crate::summary::{SummaryReport, SummaryScheduler};
use crate::traffic::TrafficAggregator;

pub const DEFAULT_OFFLINE_RECHECK: Duration = Duration::from_secs(5 * 60);

/// Collaborators the processor is assembled from.
pub struct ProcessorDeps {
    pub bindings: Arc<dyn BindingRepository>,
    pub liveness: Arc<dyn LivenessSource>,
    pub expiry: Arc<dyn ExpirySource>,
    pub accounts: Arc<dyn AccountSource>,
    pub traffic_store: Arc<dyn TrafficStore>,
    pub traffic_cache: Arc<dyn TrafficCache>,
    pub dedup: Arc<dyn AlertDeduplicator>,
    pub channel: Arc<dyn MessageChannel>,
    pub clock: Arc<dyn Clock>,
}

pub struct Processor {
    bindings: Arc<dyn BindingRepository>,
    liveness: Arc<dyn LivenessSource>,
    clock: Arc<dyn Clock>,
    tracker: Mutex<LivenessTracker>,
    liveness_window: chrono::Duration,
    offline: OfflineChecker,
    online: OnlineNotifier,
    summary: SummaryScheduler,
    expiring: ExpiringResourceChecker,
    events: EventNotifier,
    cancel: CancellationToken,
}

impl Processor {
    pub fn new(deps: ProcessorDeps, config: &AlertingConfig, cancel: CancellationToken) -> Self {
        let calendar = BusinessCalendar::new(config.business_tz());
        let dispatcher = Arc::new(Dispatcher::new(deps.channel, config.send_interval()));
        let traffic = Arc::new(TrafficAggregator::new(
            deps.traffic_store,
            deps.traffic_cache,
            deps.clock.clone(),
            config.traffic_cache_retention(),
        ));

        let offline = OfflineChecker::new(
            deps.bindings.clone(),
            deps.liveness.clone(),
            deps.dedup.clone(),
            dispatcher.clone(),
            deps.clock.clone(),
            calendar,
            config.alert_cooldown(),
        );
        let online = OnlineNotifier::new(
            deps.bindings.clone(),
            deps.dedup,
            dispatcher.clone(),
            deps.clock.clone(),
            calendar,
            config.startup_cooldown(),
        );
        let summary = SummaryScheduler::new(
            deps.bindings.clone(),
            deps.accounts,
            deps.liveness.clone(),
            traffic,
            dispatcher.clone(),
            deps.clock.clone(),
            calendar,
            config.summary_page_size,
            config.liveness_window(),
        );
        let expiring = ExpiringResourceChecker::new(
            deps.bindings.clone(),
            deps.expiry,
            dispatcher.clone(),
            deps.clock.clone(),
            calendar,
        );
        let events = EventNotifier::new(deps.bindings.clone(), dispatcher, calendar);

        tracing::info!(
            tz_offset_hours = config.business_tz_offset_hours,
            cooldown_minutes = config.alert_cooldown_minutes,
            send_interval_ms = config.send_interval_ms,
            "Alert processor ready"
        );

        Self {
            bindings: deps.bindings,
            liveness: deps.liveness,
            clock: deps.clock,
            tracker: Mutex::new(LivenessTracker::default()),
            liveness_window: config.liveness_window(),
            offline,
            online,
            summary,
            expiring,
            events,
            cancel,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn check_offline(&self) -> Result<OfflineReport, SchedulerError> {
        self.offline.run(&self.cancel).await
    }

    pub async fn send_daily_summary(&self) -> Result<SummaryReport, SchedulerError> {
        self.summary.send_daily(&self.cancel).await
    }

    pub async fn send_weekly_summary(&self) -> Result<SummaryReport, SchedulerError> {
        self.summary.send_weekly(&self.cancel).await
    }

    pub async fn check_expiring(&self) -> Result<ExpiringReport, SchedulerError> {
        self.expiring.run(&self.cancel).await
    }

    pub async fn handle_resource_online(
        &self,
        kind: ResourceKind,
        record: &LivenessRecord,
        offline_since: Option<DateTime<Utc>>,
    ) -> Result<OnlineReport, SchedulerError> {
        self.online.notify(kind, record, offline_since, &self.cancel).await
    }

    /// Scans liveness and sends back-online notices for resources that were
    /// offline on the previous scan. The first scan after start only primes
    /// the tracker.
    pub async fn check_online_transitions(&self) -> Result<usize, SchedulerError> {
        let mut notified = 0;
        let mut failures = Vec::new();

        for kind in [ResourceKind::Node, ResourceKind::Agent] {
            let records = match kind {
                ResourceKind::Node => self.liveness.list_nodes().await,
                ResourceKind::Agent => self.liveness.list_agents().await,
            };
            let records = match records {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(%kind, "Failed to scan liveness for transitions: {:#}", e);
                    failures.push(format!("{kind}: {e:#}"));
                    continue;
                }
            };

            let back = {
                let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
                tracker.observe(kind, &records, self.clock.now(), self.liveness_window)
            };
            for (record, since) in back {
                match self.handle_resource_online(kind, &record, Some(since)).await {
                    Ok(report) => notified += report.sent,
                    Err(e) => failures.push(format!("{kind} {}: {e}", record.id)),
                }
            }
        }

        crate::error::settle("online", notified, notified, failures)
    }

    pub async fn notify_new_subscriber(
        &self,
        event: &NewUserEvent,
    ) -> Result<DispatchReport, SchedulerError> {
        self.events.new_user(event, &self.cancel).await
    }

    pub async fn notify_payment_success(
        &self,
        event: &PaymentEvent,
    ) -> Result<DispatchReport, SchedulerError> {
        self.events.payment_success(event, &self.cancel).await
    }

    /// Smallest recheck interval among bindings watching either offline
    /// kind. Falls back to five minutes when nobody is subscribed or the
    /// lookup fails.
    pub async fn offline_recheck_interval(&self) -> Duration {
        let mut shortest: Option<chrono::Duration> = None;
        for kind in [AlertKind::NodeOffline, AlertKind::AgentOffline] {
            match self.bindings.find_for_notification(kind).await {
                Ok(bindings) => {
                    let min = bindings.iter().map(Binding::offline_recheck_interval).min();
                    shortest = match (shortest, min) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                }
                Err(e) => {
                    tracing::warn!(%kind, "Failed to load bindings for recheck interval: {:#}", e);
                }
            }
        }
        shortest
            .and_then(|d| d.to_std().ok())
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_OFFLINE_RECHECK)
    }

    pub async fn subscribe(&self, new: NewBinding) -> Result<Binding, SchedulerError> {
        Ok(self.bindings.create(new).await?)
    }

    pub async fn unsubscribe(&self, binding_id: i64) -> Result<(), SchedulerError> {
        if self.bindings.get(binding_id).await?.is_none() {
            return Err(SchedulerError::BindingNotFound(binding_id));
        }
        self.bindings.delete(binding_id).await?;
        tracing::info!(binding_id, "Binding deleted");
        Ok(())
    }

    pub async fn bindings_for_subscriber(
        &self,
        user_id: i64,
    ) -> Result<Vec<Binding>, SchedulerError> {
        Ok(self.bindings.find_by_subscriber(user_id).await?)
    }

    /// Validates the whole update before touching anything; an invalid value
    /// leaves the stored binding as it was.
    pub async fn update_preferences(
        &self,
        binding_id: i64,
        prefs: &BindingPreferences,
    ) -> Result<Binding, SchedulerError> {
        let mut binding = self
            .bindings
            .get(binding_id)
            .await?
            .ok_or(SchedulerError::BindingNotFound(binding_id))?;
        binding.apply_preferences(prefs, self.clock.now())?;
        self.bindings.update(&binding).await?;
        tracing::info!(binding_id, "Binding preferences updated");
        Ok(binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use alert_core::{ManualClock, ValidationError};
    use alert_store::MemoryAlertDeduplicator;

    fn config() -> AlertingConfig {
        AlertingConfig {
            send_interval_ms: 0,
            ..Default::default()
        }
    }

    struct Harness {
        bindings: Arc<FakeBindings>,
        fleet: Arc<FakeFleet>,
        channel: Arc<RecordingChannel>,
        clock: Arc<ManualClock>,
        processor: Processor,
    }

    fn harness(bindings: Vec<Binding>, now: DateTime<Utc>) -> Harness {
        let bindings = FakeBindings::with(bindings);
        let fleet = Arc::new(FakeFleet::default());
        let channel = Arc::new(RecordingChannel::default());
        let clock = manual_clock(now);
        let deps = ProcessorDeps {
            bindings: bindings.clone(),
            liveness: fleet.clone(),
            expiry: fleet.clone(),
            accounts: Arc::new(FakeAccounts::default()),
            traffic_store: Arc::new(FakeTrafficStore::default()),
            traffic_cache: Arc::new(EmptyTrafficCache),
            dedup: Arc::new(MemoryAlertDeduplicator::new()),
            channel: channel.clone(),
            clock: clock.clone(),
        };
        Harness {
            bindings,
            fleet,
            channel,
            clock,
            processor: Processor::new(deps, &config(), CancellationToken::new()),
        }
    }

    #[tokio::test]
    async fn offline_tick_alerts_only_matching_thresholds() {
        let now = local(2026, 3, 2, 10, 0);
        let mut a = binding(1, 100);
        a.offline_threshold_minutes = 5;
        let mut b = binding(2, 200);
        b.offline_threshold_minutes = 15;
        let h = harness(vec![a, b], now);
        h.fleet
            .nodes
            .lock()
            .unwrap()
            .push(resource(1, Some(now - chrono::Duration::minutes(10))));

        let report = h.processor.check_offline().await.unwrap();
        assert_eq!(report.alerts_sent, 1);
        assert_eq!(h.channel.recipients(), vec![100]);
    }

    #[tokio::test]
    async fn recovery_after_startup_cooldown_is_announced() {
        let now = local(2026, 3, 2, 10, 0);
        let h = harness(vec![binding(1, 100)], now);
        let down_since = now - chrono::Duration::minutes(40);
        h.fleet.nodes.lock().unwrap().push(resource(1, Some(down_since)));

        assert_eq!(h.processor.check_online_transitions().await.unwrap(), 0);

        h.clock.advance(chrono::Duration::minutes(10));
        *h.fleet.nodes.lock().unwrap() = vec![resource(1, Some(h.clock.now()))];
        assert_eq!(h.processor.check_online_transitions().await.unwrap(), 1);
        assert!(h.channel.texts()[0].contains("back online"));
        assert!(h.channel.texts()[0].contains("Downtime: 50m"));
    }

    #[tokio::test]
    async fn blip_below_threshold_sends_neither_alert_nor_recovery() {
        let now = local(2026, 3, 2, 10, 0);
        let mut patient = binding(1, 100);
        patient.offline_threshold_minutes = 20;
        let h = harness(vec![patient], now);
        h.fleet
            .nodes
            .lock()
            .unwrap()
            .push(resource(1, Some(now - chrono::Duration::minutes(7))));

        assert_eq!(h.processor.check_offline().await.unwrap().alerts_sent, 0);
        assert_eq!(h.processor.check_online_transitions().await.unwrap(), 0);

        h.clock.advance(chrono::Duration::minutes(6));
        assert_eq!(h.processor.check_offline().await.unwrap().alerts_sent, 0);
        assert_eq!(h.processor.check_online_transitions().await.unwrap(), 0);

        h.clock.advance(chrono::Duration::minutes(1));
        *h.fleet.nodes.lock().unwrap() = vec![resource(1, Some(h.clock.now()))];
        assert_eq!(h.processor.check_online_transitions().await.unwrap(), 0);
        assert!(h.channel.texts().is_empty());
    }

    #[tokio::test]
    async fn recheck_interval_is_minimum_across_offline_subscribers() {
        let now = local(2026, 3, 2, 10, 0);
        let mut a = binding(1, 100);
        a.offline_check_interval_minutes = 3;
        let mut b = binding(2, 200);
        b.offline_check_interval_minutes = 2;
        b.notify_node_offline = false;
        b.notify_agent_offline = false;
        let h = harness(vec![a, b, binding(3, 300)], now);

        assert_eq!(h.processor.offline_recheck_interval().await, Duration::from_secs(180));
    }

    #[tokio::test]
    async fn recheck_interval_defaults_without_subscribers() {
        let h = harness(Vec::new(), local(2026, 3, 2, 10, 0));
        assert_eq!(h.processor.offline_recheck_interval().await, DEFAULT_OFFLINE_RECHECK);
        h.bindings.fail_lookups();
        assert_eq!(h.processor.offline_recheck_interval().await, DEFAULT_OFFLINE_RECHECK);
    }

    #[tokio::test]
    async fn invalid_preferences_leave_binding_untouched() {
        let h = harness(vec![binding(1, 100)], local(2026, 3, 2, 10, 0));
        let prefs = BindingPreferences {
            offline_threshold_minutes: Some(10),
            daily_summary_hour: Some(24),
            ..Default::default()
        };

        let err = h.processor.update_preferences(1, &prefs).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Validation(ValidationError::Hour { .. })
        ));
        assert_eq!(h.bindings.row(1).offline_threshold_minutes, 5);
    }

    #[tokio::test]
    async fn valid_preferences_are_persisted() {
        let h = harness(vec![binding(1, 100)], local(2026, 3, 2, 10, 0));
        let prefs = BindingPreferences {
            enabled: vec![(AlertKind::NewUser, false)],
            offline_threshold_minutes: Some(12),
            ..Default::default()
        };

        let updated = h.processor.update_preferences(1, &prefs).await.unwrap();
        assert_eq!(updated.offline_threshold_minutes, 12);
        assert!(!h.bindings.row(1).notify_new_user);
    }

    #[tokio::test]
    async fn deleted_binding_receives_nothing() {
        let h = harness(vec![binding(1, 100), binding(2, 200)], local(2026, 3, 2, 10, 0));
        h.processor.unsubscribe(2).await.unwrap();
        assert!(matches!(
            h.processor.unsubscribe(2).await,
            Err(SchedulerError::BindingNotFound(2))
        ));

        let event = NewUserEvent {
            user_id: 9,
            email: "new@example.com".into(),
            created_at: local(2026, 3, 2, 9, 59),
        };
        h.processor.notify_new_subscriber(&event).await.unwrap();
        assert_eq!(h.channel.recipients(), vec![100]);
    }

    #[tokio::test]
    async fn subscribe_assigns_defaults() {
        let h = harness(Vec::new(), local(2026, 3, 2, 10, 0));
        let new = NewBinding::new("tgb_new".into(), 42, 4242, Some("ops".into()), "zh").unwrap();
        let created = h.processor.subscribe(new).await.unwrap();
        assert_eq!(created.offline_threshold_minutes, 5);
        assert_eq!(h.processor.bindings_for_subscriber(42).await.unwrap().len(), 1);
    }
}
