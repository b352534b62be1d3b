//! Error types shared across the alerting crates.

use thiserror::Error;

/// Failure reported by the outbound message channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The recipient blocked the bot or no longer exists. Not retryable.
    #[error("recipient {recipient} blocked the bot: {reason}")]
    Blocked { recipient: i64, reason: String },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("channel API error {status}: {description}")]
    Api { status: u16, description: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel not configured: {0}")]
    NotConfigured(String),
}

impl ChannelError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, ChannelError::Blocked { .. })
    }
}

/// Rejected binding preference value. Values are never clamped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("offline threshold must be between {min} and {max} minutes, got {value}")]
    OfflineThreshold { value: i32, min: i32, max: i32 },

    #[error("resource expiring days must be between {min} and {max}, got {value}")]
    ResourceExpiringDays { value: i32, min: i32, max: i32 },

    #[error("offline recheck interval must be between {min} and {max} minutes, got {value}")]
    OfflineRecheckInterval { value: i32, min: i32, max: i32 },

    #[error("{field} must be an hour between 0 and 23, got {value}")]
    Hour { field: &'static str, value: i32 },

    #[error("weekday must be between 0 (Sunday) and 6 (Saturday), got {0}")]
    Weekday(i32),

    #[error("unsupported language: {0}")]
    Language(String),
}

/// Failure talking to the alert lock store.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("{0}")]
    Other(String),
}
