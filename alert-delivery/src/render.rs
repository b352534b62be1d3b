//! Message bodies for every notification kind, in Telegram HTML.

use alert_core::calendar::{BusinessCalendar, Period};
use alert_core::ports::MessageAction;
use alert_core::types::{LivenessRecord, NewUserEvent, PaymentEvent, ResourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rendered message, shared by every recipient of a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub action: Option<MessageAction>,
}

impl OutboundMessage {
    pub fn text(text: String) -> Self {
        Self { text, action: None }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub nodes_online: usize,
    pub nodes_offline: usize,
    pub agents_online: usize,
    pub agents_offline: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummarySnapshot {
    pub period: Period,
    pub new_users: u64,
    pub new_subscriptions: u64,
    pub fleet: FleetStatus,
    pub traffic_bytes: u64,
}

/// Percentage change against the preceding period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyComparison {
    pub users_change_pct: f64,
    pub subscriptions_change_pct: f64,
    pub traffic_change_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiringItem {
    pub sid: String,
    pub name: String,
    pub days_remaining: i64,
}

pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

pub fn format_duration(d: chrono::Duration) -> String {
    let minutes = d.num_minutes().max(0);
    let (days, hours, mins) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);
    match (days, hours) {
        (0, 0) => format!("{}m", mins),
        (0, _) => format!("{}h {}m", hours, mins),
        _ => format!("{}d {}h {}m", days, hours, mins),
    }
}

fn format_change(pct: f64) -> String {
    if pct > 0.0 {
        format!("▲ {:.1}%", pct)
    } else if pct < 0.0 {
        format!("▼ {:.1}%", pct.abs())
    } else {
        "0.0%".to_string()
    }
}

fn local_time(cal: &BusinessCalendar, at: DateTime<Utc>) -> String {
    cal.local(at).format("%Y-%m-%d %H:%M").to_string()
}

fn kind_label(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Node => "Node",
        ResourceKind::Agent => "Forward agent",
    }
}

pub fn mute_callback(kind: ResourceKind, sid: &str) -> String {
    format!("mute:{}:{}", kind.as_str(), sid)
}

pub fn offline_alert(
    cal: &BusinessCalendar,
    kind: ResourceKind,
    resource: &LivenessRecord,
    offline_for: chrono::Duration,
) -> OutboundMessage {
    let last_seen = resource
        .last_seen_at
        .map(|at| local_time(cal, at))
        .unwrap_or_else(|| "never".to_string());

    let text = format!(
        "🔴 <b>{} offline</b>\n\nName: {}\nID: <code>{}</code>\nLast seen: {}\nOffline for: {}",
        kind_label(kind),
        html_escape(&resource.name),
        html_escape(&resource.sid),
        last_seen,
        format_duration(offline_for),
    );

    OutboundMessage {
        text,
        action: Some(MessageAction {
            text: "🔕 Mute".to_string(),
            callback_data: mute_callback(kind, &resource.sid),
        }),
    }
}

pub fn online_notice(
    cal: &BusinessCalendar,
    kind: ResourceKind,
    resource: &LivenessRecord,
    offline_since: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> OutboundMessage {
    let mut text = format!(
        "🟢 <b>{} back online</b>\n\nName: {}\nID: <code>{}</code>\nOnline at: {}",
        kind_label(kind),
        html_escape(&resource.name),
        html_escape(&resource.sid),
        local_time(cal, now),
    );
    if let Some(since) = offline_since {
        text.push_str(&format!("\nDowntime: {}", format_duration(now - since)));
    }
    OutboundMessage::text(text)
}

fn snapshot_body(cal: &BusinessCalendar, snapshot: &SummarySnapshot) -> String {
    format!(
        "Period: {} → {}\n\n👤 New users: {}\n🧾 New subscriptions: {}\n\n\
         🖥 Nodes: {} online / {} offline\n🔀 Agents: {} online / {} offline\n\n\
         📶 Traffic: {}",
        local_time(cal, snapshot.period.start),
        local_time(cal, snapshot.period.end),
        snapshot.new_users,
        snapshot.new_subscriptions,
        snapshot.fleet.nodes_online,
        snapshot.fleet.nodes_offline,
        snapshot.fleet.agents_online,
        snapshot.fleet.agents_offline,
        format_bytes(snapshot.traffic_bytes),
    )
}

pub fn daily_summary(cal: &BusinessCalendar, snapshot: &SummarySnapshot) -> OutboundMessage {
    OutboundMessage::text(format!(
        "📊 <b>Daily summary</b>\n\n{}",
        snapshot_body(cal, snapshot)
    ))
}

pub fn weekly_summary(
    cal: &BusinessCalendar,
    snapshot: &SummarySnapshot,
    comparison: &WeeklyComparison,
) -> OutboundMessage {
    OutboundMessage::text(format!(
        "📈 <b>Weekly summary</b>\n\n{}\n\n<b>vs previous week</b>\n\
         Users: {}\nSubscriptions: {}\nTraffic: {}",
        snapshot_body(cal, snapshot),
        format_change(comparison.users_change_pct),
        format_change(comparison.subscriptions_change_pct),
        format_change(comparison.traffic_change_pct),
    ))
}

fn expiring_section(out: &mut String, title: &str, items: &[ExpiringItem]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n<b>{}</b>\n", title));
    for item in items {
        let due = match item.days_remaining {
            0 => "due today".to_string(),
            1 => "1 day left".to_string(),
            n => format!("{} days left", n),
        };
        out.push_str(&format!(
            "• {} (<code>{}</code>): {}\n",
            html_escape(&item.name),
            html_escape(&item.sid),
            due
        ));
    }
}

pub fn expiring_digest(agents: &[ExpiringItem], nodes: &[ExpiringItem]) -> OutboundMessage {
    let mut text = "⏳ <b>Resources expiring soon</b>\n".to_string();
    expiring_section(&mut text, "Forward agents", agents);
    expiring_section(&mut text, "Nodes", nodes);
    OutboundMessage::text(text)
}

pub fn new_user(cal: &BusinessCalendar, event: &NewUserEvent) -> OutboundMessage {
    OutboundMessage::text(format!(
        "🆕 <b>New user</b>\n\nEmail: {}\nID: <code>{}</code>\nRegistered: {}",
        html_escape(&event.email),
        event.user_id,
        local_time(cal, event.created_at),
    ))
}

pub fn payment_success(cal: &BusinessCalendar, event: &PaymentEvent) -> OutboundMessage {
    let major = event.amount / 100;
    let minor = (event.amount % 100).abs();
    OutboundMessage::text(format!(
        "💰 <b>Payment received</b>\n\nUser: {}\nPlan: {}\nAmount: {}.{:02} {}\nPaid at: {}",
        html_escape(&event.user_email),
        html_escape(&event.plan_name),
        major,
        minor,
        html_escape(&event.currency),
        local_time(cal, event.paid_at),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn cal() -> BusinessCalendar {
        BusinessCalendar::new(FixedOffset::east_opt(8 * 3600).unwrap())
    }

    #[test]
    fn bytes_scale_to_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GB");
        assert!(format_bytes(u64::MAX).ends_with("PB"));
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(chrono::Duration::minutes(10)), "10m");
        assert_eq!(format_duration(chrono::Duration::minutes(65)), "1h 5m");
        assert_eq!(format_duration(chrono::Duration::minutes(1500)), "1d 1h 0m");
    }

    #[test]
    fn offline_alert_escapes_and_offers_mute() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();
        let record = LivenessRecord {
            id: 5,
            sid: "node_x".into(),
            name: "<edge>".into(),
            last_seen_at: Some(now - chrono::Duration::minutes(10)),
            mute_notification: false,
            enabled: true,
        };
        let msg = offline_alert(&cal(), ResourceKind::Node, &record, chrono::Duration::minutes(10));
        assert!(msg.text.contains("&lt;edge&gt;"));
        assert!(msg.text.contains("2026-03-02 08:50"));
        assert_eq!(msg.action.unwrap().callback_data, "mute:node:node_x");
    }

    #[test]
    fn digest_omits_empty_sections() {
        let agents = vec![ExpiringItem {
            sid: "fa_1".into(),
            name: "relay".into(),
            days_remaining: 0,
        }];
        let msg = expiring_digest(&agents, &[]);
        assert!(msg.text.contains("Forward agents"));
        assert!(msg.text.contains("due today"));
        assert!(!msg.text.contains("Nodes"));
    }

    #[test]
    fn change_arrows() {
        assert_eq!(format_change(12.345), "▲ 12.3%");
        assert_eq!(format_change(-50.0), "▼ 50.0%");
        assert_eq!(format_change(0.0), "0.0%");
    }
}
