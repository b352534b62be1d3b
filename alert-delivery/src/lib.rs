//! Outbound side of the alerting subsystem: the Telegram channel, message
//! rendering and the rate-limited dispatcher.

pub mod dispatcher;
pub mod render;
pub mod telegram;

pub use dispatcher::{Delivery, DeliveryOutcome, DispatchReport, Dispatcher};
pub use render::OutboundMessage;
pub use telegram::TelegramChannel;
