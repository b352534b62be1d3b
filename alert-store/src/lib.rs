//! Postgres and Redis adapters behind the alerting interfaces.

pub mod accounts;
pub mod bindings;
pub mod dedup;
pub mod fleet;
pub mod traffic;

pub use accounts::PgAccountSource;
pub use bindings::PgBindingRepository;
pub use dedup::{MemoryAlertDeduplicator, RedisAlertDeduplicator};
pub use fleet::PgFleetSource;
pub use traffic::{PgTrafficStore, RedisTrafficCache};
