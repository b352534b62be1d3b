use std::sync::Arc;

use alert_core::schema::admin_telegram_bindings::dsl::*;
use alert_core::{AlertKind, Binding, DbPool, NewBinding};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use alert_core::ports::BindingRepository;

pub struct PgBindingRepository {
    pool: Arc<DbPool>,
}

impl PgBindingRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BindingRepository for PgBindingRepository {
    async fn create(&self, new: NewBinding) -> Result<Binding> {
        let mut conn = self.pool.get().await?;
        let binding = diesel::insert_into(admin_telegram_bindings)
            .values(&new)
            .returning(Binding::as_returning())
            .get_result(&mut conn)
            .await?;

        tracing::info!(binding_id = binding.id, user_id = binding.user_id, "Binding created");
        Ok(binding)
    }

    async fn get(&self, binding_id: i64) -> Result<Option<Binding>> {
        let mut conn = self.pool.get().await?;
        let binding = admin_telegram_bindings
            .filter(id.eq(binding_id))
            .filter(deleted_at.is_null())
            .select(Binding::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(binding)
    }

    async fn find_by_subscriber(&self, subscriber_id: i64) -> Result<Vec<Binding>> {
        let mut conn = self.pool.get().await?;
        let bindings = admin_telegram_bindings
            .filter(user_id.eq(subscriber_id))
            .filter(deleted_at.is_null())
            .order(id.asc())
            .select(Binding::as_select())
            .load(&mut conn)
            .await?;
        Ok(bindings)
    }

    async fn delete(&self, binding_id: i64) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let affected = diesel::update(
            admin_telegram_bindings
                .filter(id.eq(binding_id))
                .filter(deleted_at.is_null()),
        )
        .set((deleted_at.eq(Some(now)), updated_at.eq(now)))
        .execute(&mut conn)
        .await?;

        if affected == 0 {
            tracing::debug!(binding_id, "Binding already deleted or missing");
        }
        Ok(())
    }

    async fn update(&self, binding: &Binding) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(admin_telegram_bindings.filter(id.eq(binding.id)))
            .set((
                language.eq(&binding.language),
                notify_node_offline.eq(binding.notify_node_offline),
                notify_node_online.eq(binding.notify_node_online),
                notify_agent_offline.eq(binding.notify_agent_offline),
                notify_agent_online.eq(binding.notify_agent_online),
                notify_new_user.eq(binding.notify_new_user),
                notify_payment_success.eq(binding.notify_payment_success),
                notify_daily_summary.eq(binding.notify_daily_summary),
                notify_weekly_summary.eq(binding.notify_weekly_summary),
                notify_resource_expiring.eq(binding.notify_resource_expiring),
                offline_threshold_minutes.eq(binding.offline_threshold_minutes),
                resource_expiring_days.eq(binding.resource_expiring_days),
                daily_summary_hour.eq(binding.daily_summary_hour),
                weekly_summary_hour.eq(binding.weekly_summary_hour),
                weekly_summary_weekday.eq(binding.weekly_summary_weekday),
                offline_check_interval_minutes.eq(binding.offline_check_interval_minutes),
                last_node_offline_notify_at.eq(binding.last_node_offline_notify_at),
                last_agent_offline_notify_at.eq(binding.last_agent_offline_notify_at),
                last_daily_summary_at.eq(binding.last_daily_summary_at),
                last_weekly_summary_at.eq(binding.last_weekly_summary_at),
                last_resource_expiring_notify_date.eq(binding.last_resource_expiring_notify_date),
                updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn find_for_notification(&self, kind: AlertKind) -> Result<Vec<Binding>> {
        let mut conn = self.pool.get().await?;
        let query = admin_telegram_bindings
            .filter(deleted_at.is_null())
            .select(Binding::as_select())
            .into_boxed();

        let query = match kind {
            AlertKind::NodeOffline => query.filter(notify_node_offline.eq(true)),
            AlertKind::NodeOnline => query.filter(notify_node_online.eq(true)),
            AlertKind::AgentOffline => query.filter(notify_agent_offline.eq(true)),
            AlertKind::AgentOnline => query.filter(notify_agent_online.eq(true)),
            AlertKind::NewUser => query.filter(notify_new_user.eq(true)),
            AlertKind::PaymentSuccess => query.filter(notify_payment_success.eq(true)),
            AlertKind::DailySummary => query.filter(notify_daily_summary.eq(true)),
            AlertKind::WeeklySummary => query.filter(notify_weekly_summary.eq(true)),
            AlertKind::ResourceExpiring => query.filter(notify_resource_expiring.eq(true)),
        };

        let bindings = query.order(id.asc()).load(&mut conn).await?;
        Ok(bindings)
    }

    async fn find_for_daily_summary(&self, hour: u32) -> Result<Vec<Binding>> {
        let mut conn = self.pool.get().await?;
        let bindings = admin_telegram_bindings
            .filter(deleted_at.is_null())
            .filter(notify_daily_summary.eq(true))
            .filter(daily_summary_hour.eq(hour as i32))
            .order(id.asc())
            .select(Binding::as_select())
            .load(&mut conn)
            .await?;
        Ok(bindings)
    }

    async fn find_for_weekly_summary(&self, hour: u32, weekday: u32) -> Result<Vec<Binding>> {
        let mut conn = self.pool.get().await?;
        let bindings = admin_telegram_bindings
            .filter(deleted_at.is_null())
            .filter(notify_weekly_summary.eq(true))
            .filter(weekly_summary_hour.eq(hour as i32))
            .filter(weekly_summary_weekday.eq(weekday as i32))
            .order(id.asc())
            .select(Binding::as_select())
            .load(&mut conn)
            .await?;
        Ok(bindings)
    }
}
