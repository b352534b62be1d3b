//! Alert checkers and the processor facade that drives them.

pub mod error;
pub mod events;
pub mod expiring;
pub mod offline;
pub mod online;
pub mod processor;
pub mod summary;
pub mod traffic;

#[cfg(test)]
mod testing;

pub use error::SchedulerError;
pub use expiring::{ExpiringReport, ExpiringResourceChecker};
pub use offline::{OfflineChecker, OfflineReport};
pub use online::{OnlineNotifier, OnlineReport};
pub use processor::{Processor, ProcessorDeps, DEFAULT_OFFLINE_RECHECK};
pub use summary::{percent_change, SummaryReport, SummaryScheduler};
pub use traffic::TrafficAggregator;
