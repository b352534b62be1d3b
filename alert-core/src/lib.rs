pub mod binding;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod ports;
pub mod redis;
pub mod schema;
pub mod types;

pub use binding::{Binding, BindingPreferences, NewBinding};
pub use calendar::{BusinessCalendar, Period};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use context::AlertContext;
pub use db::DbPool;
pub use error::{ChannelError, DedupError, ValidationError};
pub use crate::redis::RedisPool;
pub use types::{AlertKind, ResourceKind};

/// Hides the password component of a connection URL before it is logged.
pub fn mask_credentials(url: &str) -> String {
    let Some(at_pos) = url.rfind('@') else {
        return url.to_string();
    };
    let (before_at, after_at) = url.split_at(at_pos);
    let scheme_end = before_at.find("://").map(|p| p + 3).unwrap_or(0);
    match before_at[scheme_end..].rfind(':') {
        Some(colon) => format!("{}:****{}", &before_at[..scheme_end + colon], after_at),
        None => format!("{}****{}", &before_at[..scheme_end], after_at),
    }
}

#[cfg(test)]
mod tests {
    use super::mask_credentials;

    #[test]
    fn masks_password_only() {
        assert_eq!(
            mask_credentials("postgres://fleet:s3cret@db:5432/fleet"),
            "postgres://fleet:****@db:5432/fleet"
        );
    }

    #[test]
    fn masks_bare_credential() {
        assert_eq!(mask_credentials("redis://token@cache:6379"), "redis://****@cache:6379");
    }

    #[test]
    fn leaves_plain_urls_alone() {
        assert_eq!(mask_credentials("redis://localhost:6379"), "redis://localhost:6379");
    }
}
