//! Offline detection for nodes and forward agents.
//!
//! One scan per resource kind per tick. The scan cutoff is the smallest
//! threshold among subscribed bindings; each binding is then matched against
//! its own threshold before anything is sent. A fleet-wide lock per
//! (kind, resource) keeps concurrent schedulers from alerting twice within
//! the cooldown.

use std::sync::Arc;
use std::time::Duration;

use alert_core::binding::Binding;
use alert_core::ports::{AlertDeduplicator, BindingRepository, LivenessSource};
use alert_core::types::{LivenessRecord, ResourceKind};
use alert_core::{BusinessCalendar, Clock};
use alert_delivery::{render, Delivery, DispatchReport, Dispatcher};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{settle, SchedulerError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfflineReport {
    /// Offline resources past the scan cutoff, muted ones included.
    pub detected: usize,
    pub muted: usize,
    /// Lock held elsewhere or still cooling down.
    pub suppressed: usize,
    pub alerts_sent: usize,
    pub delivery_errors: usize,
    pub lock_errors: usize,
    pub locks_released: usize,
}

pub struct OfflineChecker {
    bindings: Arc<dyn BindingRepository>,
    liveness: Arc<dyn LivenessSource>,
    dedup: Arc<dyn AlertDeduplicator>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    cooldown: Duration,
}

impl OfflineChecker {
    pub fn new(
        bindings: Arc<dyn BindingRepository>,
        liveness: Arc<dyn LivenessSource>,
        dedup: Arc<dyn AlertDeduplicator>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
        cooldown: Duration,
    ) -> Self {
        Self {
            bindings,
            liveness,
            dedup,
            dispatcher,
            clock,
            calendar,
            cooldown,
        }
    }

    /// Checks nodes, then agents. A failure on one kind does not stop the
    /// other.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<OfflineReport, SchedulerError> {
        let mut report = OfflineReport::default();
        let mut failures = Vec::new();

        for kind in [ResourceKind::Node, ResourceKind::Agent] {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.check_kind(kind, &mut report, cancel).await {
                tracing::error!(%kind, "Offline check failed: {:#}", e);
                failures.push(format!("{kind}: {e:#}"));
            }
        }

        tracing::info!(
            detected = report.detected,
            muted = report.muted,
            suppressed = report.suppressed,
            alerts_sent = report.alerts_sent,
            delivery_errors = report.delivery_errors,
            lock_errors = report.lock_errors,
            "Offline check finished"
        );
        settle("offline", report, report.alerts_sent, failures)
    }

    async fn check_kind(
        &self,
        kind: ResourceKind,
        report: &mut OfflineReport,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let alert = kind.offline_alert();
        let mut bindings: Vec<Binding> = self
            .bindings
            .find_for_notification(alert)
            .await?
            .into_iter()
            .filter(|b| b.is_enabled(alert))
            .collect();

        let Some(cutoff) = bindings.iter().map(Binding::offline_threshold).min() else {
            tracing::debug!(%kind, "No bindings subscribed to offline alerts");
            return Ok(());
        };

        let resources = match kind {
            ResourceKind::Node => self.liveness.list_nodes().await?,
            ResourceKind::Agent => self.liveness.list_agents().await?,
        };

        let now = self.clock.now();
        let offline: Vec<(LivenessRecord, chrono::Duration)> = resources
            .into_iter()
            .filter(|r| r.enabled)
            .filter_map(|r| r.offline_for(now).map(|d| (r, d)))
            .filter(|(_, offline_for)| *offline_for >= cutoff)
            .collect();

        report.detected += offline.len();
        tracing::debug!(
            %kind,
            offline = offline.len(),
            cutoff_minutes = cutoff.num_minutes(),
            "Scanned liveness"
        );

        for (resource, offline_for) in offline {
            if cancel.is_cancelled() {
                break;
            }
            if resource.mute_notification {
                report.muted += 1;
                continue;
            }

            match self
                .dedup
                .try_acquire_alert_lock(alert, resource.id, self.cooldown)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    report.suppressed += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        %kind,
                        resource_id = resource.id,
                        "Failed to acquire alert lock: {}",
                        e
                    );
                    report.lock_errors += 1;
                    continue;
                }
            }

            let dispatch = self
                .alert_resource(kind, &resource, offline_for, &bindings, cancel)
                .await;
            report.alerts_sent += dispatch.sent();
            report.delivery_errors += dispatch.errors();

            if should_release(&dispatch) {
                match self.dedup.clear_alert(alert, resource.id).await {
                    Ok(()) => report.locks_released += 1,
                    Err(e) => {
                        tracing::warn!(
                            %kind,
                            resource_id = resource.id,
                            "Failed to release alert lock: {}",
                            e
                        )
                    }
                }
            }

            self.record_sent(kind, &mut bindings, &dispatch, now).await;
        }
        Ok(())
    }

    async fn alert_resource(
        &self,
        kind: ResourceKind,
        resource: &LivenessRecord,
        offline_for: chrono::Duration,
        bindings: &[Binding],
        cancel: &CancellationToken,
    ) -> DispatchReport {
        let message = Arc::new(render::offline_alert(&self.calendar, kind, resource, offline_for));
        let deliveries: Vec<Delivery> = bindings
            .iter()
            .filter(|b| b.offline_threshold_reached(offline_for))
            .map(|b| Delivery {
                binding_id: b.id,
                recipient: b.telegram_user_id,
                message: Arc::clone(&message),
            })
            .collect();

        tracing::info!(
            %kind,
            resource_id = resource.id,
            sid = %resource.sid,
            offline_minutes = offline_for.num_minutes(),
            recipients = deliveries.len(),
            "Resource offline, alerting"
        );
        self.dispatcher.dispatch(deliveries, cancel).await
    }

    async fn record_sent(
        &self,
        kind: ResourceKind,
        bindings: &mut [Binding],
        dispatch: &DispatchReport,
        now: DateTime<Utc>,
    ) {
        for id in dispatch.sent_binding_ids() {
            let Some(binding) = bindings.iter_mut().find(|b| b.id == id) else {
                continue;
            };
            if !binding.record_offline_notified(kind, now) {
                continue;
            }
            if let Err(e) = self.bindings.update(binding).await {
                tracing::warn!(binding_id = id, "Failed to persist offline bookkeeping: {:#}", e);
            }
        }
    }
}

/// Release the lock when nobody got the alert for a retryable reason.
/// All-blocked recipients keep it; a cancelled run keeps it too.
fn should_release(dispatch: &DispatchReport) -> bool {
    dispatch.sent() == 0 && dispatch.skipped() == 0 && dispatch.errors() > 0
}
