//! Rate-limited fan-out over the outbound channel.
//!
//! Messages go out one at a time with a fixed pause between consecutive
//! sends. A failing recipient never stops the loop; the caller gets a
//! per-binding outcome list instead of an error.

use std::sync::Arc;
use std::time::Duration;

use alert_core::ports::MessageChannel;
use tokio_util::sync::CancellationToken;

use crate::render::OutboundMessage;

#[derive(Debug, Clone)]
pub struct Delivery {
    pub binding_id: i64,
    pub recipient: i64,
    pub message: Arc<OutboundMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// Recipient blocked the bot. Expected, not retried.
    Blocked,
    Failed,
    /// Not attempted because the run was cancelled.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: Vec<(i64, DeliveryOutcome)>,
}

impl DispatchReport {
    fn count(&self, wanted: DeliveryOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == wanted).count()
    }

    pub fn sent(&self) -> usize {
        self.count(DeliveryOutcome::Sent)
    }

    pub fn blocked(&self) -> usize {
        self.count(DeliveryOutcome::Blocked)
    }

    pub fn errors(&self) -> usize {
        self.count(DeliveryOutcome::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(DeliveryOutcome::Skipped)
    }

    pub fn outcome_for(&self, binding_id: i64) -> Option<DeliveryOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == binding_id)
            .map(|(_, o)| *o)
    }

    pub fn sent_binding_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == DeliveryOutcome::Sent)
            .map(|(id, _)| *id)
    }
}

pub struct Dispatcher {
    channel: Arc<dyn MessageChannel>,
    interval: Duration,
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn MessageChannel>, interval: Duration) -> Self {
        Self { channel, interval }
    }

    pub async fn dispatch(
        &self,
        deliveries: Vec<Delivery>,
        cancel: &CancellationToken,
    ) -> DispatchReport {
        let mut report = DispatchReport {
            outcomes: Vec::with_capacity(deliveries.len()),
        };

        for (index, delivery) in deliveries.into_iter().enumerate() {
            if cancel.is_cancelled() {
                report.outcomes.push((delivery.binding_id, DeliveryOutcome::Skipped));
                continue;
            }

            if index > 0 && !self.interval.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.outcomes.push((delivery.binding_id, DeliveryOutcome::Skipped));
                        continue;
                    }
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }

            let outcome = self.send_one(&delivery).await;
            report.outcomes.push((delivery.binding_id, outcome));
        }

        if report.skipped() > 0 {
            tracing::warn!(skipped = report.skipped(), "Dispatch cancelled before completion");
        }
        tracing::debug!(
            sent = report.sent(),
            blocked = report.blocked(),
            errors = report.errors(),
            "Dispatch finished"
        );
        report
    }

    async fn send_one(&self, delivery: &Delivery) -> DeliveryOutcome {
        let message = &delivery.message;
        let result = match &message.action {
            Some(action) => {
                self.channel
                    .send_message_with_action(delivery.recipient, &message.text, action)
                    .await
            }
            None => self.channel.send_message(delivery.recipient, &message.text).await,
        };

        match result {
            Ok(()) => DeliveryOutcome::Sent,
            Err(e) if e.is_blocked() => {
                tracing::info!(
                    binding_id = delivery.binding_id,
                    recipient = delivery.recipient,
                    "Recipient blocked the bot, skipping: {}",
                    e
                );
                DeliveryOutcome::Blocked
            }
            Err(e) => {
                tracing::warn!(
                    binding_id = delivery.binding_id,
                    recipient = delivery.recipient,
                    "Failed to deliver message: {}",
                    e
                );
                DeliveryOutcome::Failed
            }
        }
    }
}
