use std::sync::Arc;

use alert_core::ports::BindingRepository;
use alert_core::types::{AlertKind, NewUserEvent, PaymentEvent};
use alert_core::BusinessCalendar;
use alert_delivery::{render, Delivery, DispatchReport, Dispatcher, OutboundMessage};
use tokio_util::sync::CancellationToken;

use crate::error::{settle, SchedulerError};

/// Business-event fan-out: sign-ups and successful payments.
pub struct EventNotifier {
    bindings: Arc<dyn BindingRepository>,
    dispatcher: Arc<Dispatcher>,
    calendar: BusinessCalendar,
}

impl EventNotifier {
    pub fn new(
        bindings: Arc<dyn BindingRepository>,
        dispatcher: Arc<Dispatcher>,
        calendar: BusinessCalendar,
    ) -> Self {
        Self {
            bindings,
            dispatcher,
            calendar,
        }
    }

    pub async fn new_user(
        &self,
        event: &NewUserEvent,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, SchedulerError> {
        let message = render::new_user(&self.calendar, event);
        tracing::debug!(user_id = event.user_id, "Announcing new user");
        self.broadcast(AlertKind::NewUser, message, cancel).await
    }

    pub async fn payment_success(
        &self,
        event: &PaymentEvent,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, SchedulerError> {
        let message = render::payment_success(&self.calendar, event);
        tracing::debug!(payment_id = event.payment_id, "Announcing payment");
        self.broadcast(AlertKind::PaymentSuccess, message, cancel).await
    }

    async fn broadcast(
        &self,
        kind: AlertKind,
        message: OutboundMessage,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, SchedulerError> {
        let bindings = match self.bindings.find_for_notification(kind).await {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(%kind, "Failed to load bindings for event: {:#}", e);
                let failures = vec![format!("binding lookup: {e:#}")];
                return settle(kind.as_str(), DispatchReport::default(), 0, failures);
            }
        };

        let message = Arc::new(message);
        let deliveries = bindings
            .iter()
            .filter(|b| b.is_enabled(kind))
            .map(|b| Delivery {
                binding_id: b.id,
                recipient: b.telegram_user_id,
                message: Arc::clone(&message),
            })
            .collect();

        let report = self.dispatcher.dispatch(deliveries, cancel).await;
        tracing::info!(
            %kind,
            sent = report.sent(),
            errors = report.errors(),
            "Event notification sent"
        );
        Ok(report)
    }
}
