//! Subscriber bindings: per-subscriber notification preferences plus the
//! bookkeeping that keeps periodic notifications from repeating.
//!
//! Every bounded preference is validated on every mutation and rejected,
//! never clamped. "Last sent" fields only ever move forward.

use std::ops::RangeInclusive;

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calendar::BusinessCalendar;
use crate::error::ValidationError;
use crate::schema::admin_telegram_bindings;
use crate::types::{AlertKind, ResourceKind};

pub const OFFLINE_THRESHOLD_MINUTES: RangeInclusive<i32> = 3..=30;
pub const RESOURCE_EXPIRING_DAYS: RangeInclusive<i32> = 1..=30;
pub const OFFLINE_RECHECK_MINUTES: RangeInclusive<i32> = 1..=30;
pub const SUPPORTED_LANGUAGES: &[&str] = &["en", "zh"];

const HOURS: RangeInclusive<i32> = 0..=23;
const WEEKDAYS: RangeInclusive<i32> = 0..=6;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = admin_telegram_bindings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Binding {
    pub id: i64,
    pub sid: String,
    pub user_id: i64,
    pub telegram_user_id: i64,
    pub telegram_username: Option<String>,
    pub language: String,

    pub notify_node_offline: bool,
    pub notify_node_online: bool,
    pub notify_agent_offline: bool,
    pub notify_agent_online: bool,
    pub notify_new_user: bool,
    pub notify_payment_success: bool,
    pub notify_daily_summary: bool,
    pub notify_weekly_summary: bool,
    pub notify_resource_expiring: bool,

    pub offline_threshold_minutes: i32,
    pub resource_expiring_days: i32,
    pub daily_summary_hour: i32,
    pub weekly_summary_hour: i32,
    pub weekly_summary_weekday: i32,
    pub offline_check_interval_minutes: i32,

    pub last_node_offline_notify_at: Option<DateTime<Utc>>,
    pub last_agent_offline_notify_at: Option<DateTime<Utc>>,
    pub last_daily_summary_at: Option<DateTime<Utc>>,
    pub last_weekly_summary_at: Option<DateTime<Utc>>,
    pub last_resource_expiring_notify_date: Option<NaiveDate>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Row inserted when a subscriber opts in.
#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = admin_telegram_bindings)]
pub struct NewBinding {
    pub sid: String,
    pub user_id: i64,
    pub telegram_user_id: i64,
    pub telegram_username: Option<String>,
    pub language: String,
    pub notify_node_offline: bool,
    pub notify_node_online: bool,
    pub notify_agent_offline: bool,
    pub notify_agent_online: bool,
    pub notify_new_user: bool,
    pub notify_payment_success: bool,
    pub notify_daily_summary: bool,
    pub notify_weekly_summary: bool,
    pub notify_resource_expiring: bool,
    pub offline_threshold_minutes: i32,
    pub resource_expiring_days: i32,
    pub daily_summary_hour: i32,
    pub weekly_summary_hour: i32,
    pub weekly_summary_weekday: i32,
    pub offline_check_interval_minutes: i32,
}

impl NewBinding {
    pub fn new(
        sid: String,
        user_id: i64,
        telegram_user_id: i64,
        telegram_username: Option<String>,
        language: &str,
    ) -> Result<Self, ValidationError> {
        validate_language(language)?;
        Ok(NewBinding {
            sid,
            user_id,
            telegram_user_id,
            telegram_username,
            language: language.to_string(),
            notify_node_offline: true,
            notify_node_online: true,
            notify_agent_offline: true,
            notify_agent_online: true,
            notify_new_user: true,
            notify_payment_success: true,
            notify_daily_summary: true,
            notify_weekly_summary: true,
            notify_resource_expiring: true,
            offline_threshold_minutes: 5,
            resource_expiring_days: 7,
            daily_summary_hour: 9,
            weekly_summary_hour: 9,
            weekly_summary_weekday: 1,
            offline_check_interval_minutes: 5,
        })
    }
}

/// Partial preference update. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingPreferences {
    #[serde(default)]
    pub enabled: Vec<(AlertKind, bool)>,
    pub offline_threshold_minutes: Option<i32>,
    pub resource_expiring_days: Option<i32>,
    pub daily_summary_hour: Option<i32>,
    pub weekly_summary_hour: Option<i32>,
    pub weekly_summary_weekday: Option<i32>,
    pub offline_check_interval_minutes: Option<i32>,
    pub language: Option<String>,
}

fn check_range(
    value: i32,
    range: &RangeInclusive<i32>,
    err: impl FnOnce(i32, i32, i32) -> ValidationError,
) -> Result<(), ValidationError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(err(value, *range.start(), *range.end()))
    }
}

fn validate_hour(field: &'static str, value: i32) -> Result<(), ValidationError> {
    if HOURS.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::Hour { field, value })
    }
}

fn validate_language(language: &str) -> Result<(), ValidationError> {
    if SUPPORTED_LANGUAGES.contains(&language) {
        Ok(())
    } else {
        Err(ValidationError::Language(language.to_string()))
    }
}

/// Moves `slot` to `at` only if that is later than what it holds.
fn advance<T: PartialOrd + Copy>(slot: &mut Option<T>, at: T) -> bool {
    match slot {
        Some(current) if *current >= at => false,
        _ => {
            *slot = Some(at);
            true
        }
    }
}

impl BindingPreferences {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(v) = self.offline_threshold_minutes {
            check_range(v, &OFFLINE_THRESHOLD_MINUTES, |value, min, max| {
                ValidationError::OfflineThreshold { value, min, max }
            })?;
        }
        if let Some(v) = self.resource_expiring_days {
            check_range(v, &RESOURCE_EXPIRING_DAYS, |value, min, max| {
                ValidationError::ResourceExpiringDays { value, min, max }
            })?;
        }
        if let Some(v) = self.offline_check_interval_minutes {
            check_range(v, &OFFLINE_RECHECK_MINUTES, |value, min, max| {
                ValidationError::OfflineRecheckInterval { value, min, max }
            })?;
        }
        if let Some(v) = self.daily_summary_hour {
            validate_hour("daily_summary_hour", v)?;
        }
        if let Some(v) = self.weekly_summary_hour {
            validate_hour("weekly_summary_hour", v)?;
        }
        if let Some(v) = self.weekly_summary_weekday {
            if !WEEKDAYS.contains(&v) {
                return Err(ValidationError::Weekday(v));
            }
        }
        if let Some(lang) = &self.language {
            validate_language(lang)?;
        }
        Ok(())
    }
}

impl Binding {
    pub fn is_enabled(&self, kind: AlertKind) -> bool {
        match kind {
            AlertKind::NodeOffline => self.notify_node_offline,
            AlertKind::NodeOnline => self.notify_node_online,
            AlertKind::AgentOffline => self.notify_agent_offline,
            AlertKind::AgentOnline => self.notify_agent_online,
            AlertKind::NewUser => self.notify_new_user,
            AlertKind::PaymentSuccess => self.notify_payment_success,
            AlertKind::DailySummary => self.notify_daily_summary,
            AlertKind::WeeklySummary => self.notify_weekly_summary,
            AlertKind::ResourceExpiring => self.notify_resource_expiring,
        }
    }

    pub fn set_enabled(&mut self, kind: AlertKind, enabled: bool) {
        let flag = match kind {
            AlertKind::NodeOffline => &mut self.notify_node_offline,
            AlertKind::NodeOnline => &mut self.notify_node_online,
            AlertKind::AgentOffline => &mut self.notify_agent_offline,
            AlertKind::AgentOnline => &mut self.notify_agent_online,
            AlertKind::NewUser => &mut self.notify_new_user,
            AlertKind::PaymentSuccess => &mut self.notify_payment_success,
            AlertKind::DailySummary => &mut self.notify_daily_summary,
            AlertKind::WeeklySummary => &mut self.notify_weekly_summary,
            AlertKind::ResourceExpiring => &mut self.notify_resource_expiring,
        };
        *flag = enabled;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Checks every bounded field as currently stored.
    pub fn validate(&self) -> Result<(), ValidationError> {
        BindingPreferences {
            enabled: Vec::new(),
            offline_threshold_minutes: Some(self.offline_threshold_minutes),
            resource_expiring_days: Some(self.resource_expiring_days),
            daily_summary_hour: Some(self.daily_summary_hour),
            weekly_summary_hour: Some(self.weekly_summary_hour),
            weekly_summary_weekday: Some(self.weekly_summary_weekday),
            offline_check_interval_minutes: Some(self.offline_check_interval_minutes),
            language: Some(self.language.clone()),
        }
        .validate()
    }

    /// Applies `prefs` atomically: if any value is invalid nothing changes.
    pub fn apply_preferences(
        &mut self,
        prefs: &BindingPreferences,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        prefs.validate()?;

        for (kind, enabled) in &prefs.enabled {
            self.set_enabled(*kind, *enabled);
        }
        if let Some(v) = prefs.offline_threshold_minutes {
            self.offline_threshold_minutes = v;
        }
        if let Some(v) = prefs.resource_expiring_days {
            self.resource_expiring_days = v;
        }
        if let Some(v) = prefs.daily_summary_hour {
            self.daily_summary_hour = v;
        }
        if let Some(v) = prefs.weekly_summary_hour {
            self.weekly_summary_hour = v;
        }
        if let Some(v) = prefs.weekly_summary_weekday {
            self.weekly_summary_weekday = v;
        }
        if let Some(v) = prefs.offline_check_interval_minutes {
            self.offline_check_interval_minutes = v;
        }
        if let Some(lang) = &prefs.language {
            self.language = lang.clone();
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn offline_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.offline_threshold_minutes))
    }

    pub fn offline_recheck_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.offline_check_interval_minutes))
    }

    /// True when a resource offline for `offline_for` has crossed this
    /// binding's own threshold.
    pub fn offline_threshold_reached(&self, offline_for: chrono::Duration) -> bool {
        self.offline_threshold() <= offline_for
    }

    pub fn daily_summary_due(&self, cal: &BusinessCalendar, now: DateTime<Utc>) -> bool {
        if !self.notify_daily_summary || cal.hour(now) as i32 != self.daily_summary_hour {
            return false;
        }
        match self.last_daily_summary_at {
            Some(last) => !cal.same_day(last, now),
            None => true,
        }
    }

    pub fn weekly_summary_due(&self, cal: &BusinessCalendar, now: DateTime<Utc>) -> bool {
        if !self.notify_weekly_summary
            || cal.hour(now) as i32 != self.weekly_summary_hour
            || cal.weekday(now) as i32 != self.weekly_summary_weekday
        {
            return false;
        }
        let boundary = cal.week_boundary(now, self.weekly_summary_weekday as u32);
        match self.last_weekly_summary_at {
            Some(last) => last < boundary,
            None => true,
        }
    }

    pub fn resource_expiring_due(&self, cal: &BusinessCalendar, now: DateTime<Utc>) -> bool {
        if !self.notify_resource_expiring {
            return false;
        }
        match self.last_resource_expiring_notify_date {
            Some(last) => last != cal.date(now),
            None => true,
        }
    }

    pub fn record_offline_notified(&mut self, kind: ResourceKind, at: DateTime<Utc>) -> bool {
        match kind {
            ResourceKind::Node => advance(&mut self.last_node_offline_notify_at, at),
            ResourceKind::Agent => advance(&mut self.last_agent_offline_notify_at, at),
        }
    }

    pub fn record_daily_summary_sent(&mut self, at: DateTime<Utc>) -> bool {
        advance(&mut self.last_daily_summary_at, at)
    }

    pub fn record_weekly_summary_sent(&mut self, at: DateTime<Utc>) -> bool {
        advance(&mut self.last_weekly_summary_at, at)
    }

    pub fn record_resource_expiring_sent(&mut self, date: NaiveDate) -> bool {
        advance(&mut self.last_resource_expiring_notify_date, date)
    }
}

/// Builds a persisted-looking binding from defaults. Handy for fixtures.
impl From<(i64, NewBinding, DateTime<Utc>)> for Binding {
    fn from((id, new, now): (i64, NewBinding, DateTime<Utc>)) -> Self {
        Binding {
            id,
            sid: new.sid,
            user_id: new.user_id,
            telegram_user_id: new.telegram_user_id,
            telegram_username: new.telegram_username,
            language: new.language,
            notify_node_offline: new.notify_node_offline,
            notify_node_online: new.notify_node_online,
            notify_agent_offline: new.notify_agent_offline,
            notify_agent_online: new.notify_agent_online,
            notify_new_user: new.notify_new_user,
            notify_payment_success: new.notify_payment_success,
            notify_daily_summary: new.notify_daily_summary,
            notify_weekly_summary: new.notify_weekly_summary,
            notify_resource_expiring: new.notify_resource_expiring,
            offline_threshold_minutes: new.offline_threshold_minutes,
            resource_expiring_days: new.resource_expiring_days,
            daily_summary_hour: new.daily_summary_hour,
            weekly_summary_hour: new.weekly_summary_hour,
            weekly_summary_weekday: new.weekly_summary_weekday,
            offline_check_interval_minutes: new.offline_check_interval_minutes,
            last_node_offline_notify_at: None,
            last_agent_offline_notify_at: None,
            last_daily_summary_at: None,
            last_weekly_summary_at: None,
            last_resource_expiring_notify_date: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn cal() -> BusinessCalendar {
        BusinessCalendar::new(FixedOffset::east_opt(8 * 3600).unwrap())
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn binding() -> Binding {
        let new = NewBinding::new("tgb_1".into(), 7, 1001, Some("ops".into()), "en").unwrap();
        Binding::from((1, new, utc(2026, 1, 1, 0, 0)))
    }

    #[test]
    fn defaults_are_valid() {
        assert!(binding().validate().is_ok());
    }

    #[test]
    fn unsupported_language_is_rejected_on_creation() {
        let err = NewBinding::new("tgb_1".into(), 7, 1001, None, "fr").unwrap_err();
        assert_eq!(err, ValidationError::Language("fr".into()));
    }

    #[test]
    fn out_of_range_update_changes_nothing() {
        let mut b = binding();
        let before = b.clone();
        let prefs = BindingPreferences {
            enabled: vec![(AlertKind::NodeOffline, false)],
            daily_summary_hour: Some(10),
            offline_threshold_minutes: Some(2),
            ..Default::default()
        };
        let err = b.apply_preferences(&prefs, utc(2026, 1, 2, 0, 0)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::OfflineThreshold { value: 2, min: 3, max: 30 }
        );
        assert_eq!(b, before);
    }

    #[test]
    fn each_bounded_field_is_checked() {
        let cases = [
            BindingPreferences { resource_expiring_days: Some(31), ..Default::default() },
            BindingPreferences { offline_check_interval_minutes: Some(0), ..Default::default() },
            BindingPreferences { daily_summary_hour: Some(24), ..Default::default() },
            BindingPreferences { weekly_summary_hour: Some(-1), ..Default::default() },
            BindingPreferences { weekly_summary_weekday: Some(7), ..Default::default() },
        ];
        for prefs in cases {
            assert!(prefs.validate().is_err(), "{:?} should be rejected", prefs);
        }
    }

    #[test]
    fn valid_update_applies_all_fields() {
        let mut b = binding();
        let now = utc(2026, 1, 2, 0, 0);
        let prefs = BindingPreferences {
            enabled: vec![(AlertKind::WeeklySummary, false)],
            offline_threshold_minutes: Some(30),
            weekly_summary_weekday: Some(0),
            language: Some("zh".into()),
            ..Default::default()
        };
        b.apply_preferences(&prefs, now).unwrap();
        assert!(!b.is_enabled(AlertKind::WeeklySummary));
        assert_eq!(b.offline_threshold_minutes, 30);
        assert_eq!(b.weekly_summary_weekday, 0);
        assert_eq!(b.language, "zh");
        assert_eq!(b.updated_at, now);
    }

    #[test]
    fn bookkeeping_never_moves_backwards() {
        let mut b = binding();
        let later = utc(2026, 1, 5, 1, 0);
        assert!(b.record_daily_summary_sent(later));
        assert!(!b.record_daily_summary_sent(utc(2026, 1, 4, 1, 0)));
        assert_eq!(b.last_daily_summary_at, Some(later));

        assert!(b.record_offline_notified(ResourceKind::Agent, later));
        assert!(b.last_node_offline_notify_at.is_none());
    }

    #[test]
    fn threshold_match_is_inclusive() {
        let b = binding();
        assert!(b.offline_threshold_reached(chrono::Duration::minutes(5)));
        assert!(!b.offline_threshold_reached(chrono::Duration::minutes(4)));
    }

    #[test]
    fn daily_summary_dedups_by_business_day() {
        let cal = cal();
        let mut b = binding();
        // 09:00 local on 2026-03-02.
        let now = utc(2026, 3, 2, 1, 0);
        assert!(b.daily_summary_due(&cal, now));

        b.record_daily_summary_sent(now);
        assert!(!b.daily_summary_due(&cal, now + chrono::Duration::minutes(30)));
        // Next day, same hour.
        assert!(b.daily_summary_due(&cal, now + chrono::Duration::days(1)));
        // Wrong hour.
        let next_day_later = now + chrono::Duration::days(1) + chrono::Duration::hours(1);
        assert!(!b.daily_summary_due(&cal, next_day_later));
    }

    #[test]
    fn disabled_kind_is_never_due() {
        let cal = cal();
        let mut b = binding();
        b.set_enabled(AlertKind::DailySummary, false);
        b.set_enabled(AlertKind::ResourceExpiring, false);
        let now = utc(2026, 3, 2, 1, 0);
        assert!(!b.daily_summary_due(&cal, now));
        assert!(!b.resource_expiring_due(&cal, now));
    }

    #[test]
    fn weekly_summary_due_after_boundary() {
        let cal = cal();
        let mut b = binding();
        // Monday 2026-03-02 09:00 local; last sent previous Monday 09:05.
        let now = utc(2026, 3, 2, 1, 0);
        b.last_weekly_summary_at = Some(utc(2026, 2, 23, 1, 5));
        assert!(b.weekly_summary_due(&cal, now));

        b.record_weekly_summary_sent(now);
        assert!(!b.weekly_summary_due(&cal, now + chrono::Duration::minutes(10)));
        // Tuesday is not the configured weekday.
        assert!(!b.weekly_summary_due(&cal, now + chrono::Duration::days(1)));
    }

    #[test]
    fn resource_expiring_due_once_per_day() {
        let cal = cal();
        let mut b = binding();
        let now = utc(2026, 3, 2, 1, 0);
        assert!(b.resource_expiring_due(&cal, now));
        b.record_resource_expiring_sent(cal.date(now));
        assert!(!b.resource_expiring_due(&cal, now + chrono::Duration::hours(10)));
        assert!(b.resource_expiring_due(&cal, now + chrono::Duration::hours(15)));
    }
}
