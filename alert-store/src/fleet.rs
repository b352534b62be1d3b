use std::sync::Arc;

use alert_core::ports::{ExpirySource, LivenessSource};
use alert_core::schema::{forward_agents, nodes};
use alert_core::types::{ExpiringResource, LivenessRecord};
use alert_core::DbPool;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

const ACTIVE_STATUS: &str = "active";

type LivenessRow = (i64, String, String, String, Option<DateTime<Utc>>, bool);
type ExpiryRow = (i64, String, String, Option<DateTime<Utc>>);

fn liveness_record(row: LivenessRow) -> LivenessRecord {
    let (id, sid, name, status, last_seen_at, mute_notification) = row;
    LivenessRecord {
        id,
        sid,
        name,
        last_seen_at,
        mute_notification,
        enabled: status == ACTIVE_STATUS,
    }
}

fn expiring_resource((id, sid, name, expires_at): ExpiryRow) -> Option<ExpiringResource> {
    expires_at.map(|expires_at| ExpiringResource {
        id,
        sid,
        name,
        expires_at,
    })
}

/// Reads nodes and forward agents straight from the resource tables.
pub struct PgFleetSource {
    pool: Arc<DbPool>,
}

impl PgFleetSource {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LivenessSource for PgFleetSource {
    async fn list_nodes(&self) -> Result<Vec<LivenessRecord>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<LivenessRow> = nodes::table
            .filter(nodes::deleted_at.is_null())
            .select((
                nodes::id,
                nodes::sid,
                nodes::name,
                nodes::status,
                nodes::last_seen_at,
                nodes::mute_notification,
            ))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(liveness_record).collect())
    }

    async fn list_agents(&self) -> Result<Vec<LivenessRecord>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<LivenessRow> = forward_agents::table
            .filter(forward_agents::deleted_at.is_null())
            .select((
                forward_agents::id,
                forward_agents::sid,
                forward_agents::name,
                forward_agents::status,
                forward_agents::last_seen_at,
                forward_agents::mute_notification,
            ))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(liveness_record).collect())
    }
}

#[async_trait]
impl ExpirySource for PgFleetSource {
    async fn find_expiring_nodes(&self, until: DateTime<Utc>) -> Result<Vec<ExpiringResource>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<ExpiryRow> = nodes::table
            .filter(nodes::deleted_at.is_null())
            .filter(nodes::expires_at.is_not_null())
            .filter(nodes::expires_at.le(until))
            .order(nodes::expires_at.asc())
            .select((nodes::id, nodes::sid, nodes::name, nodes::expires_at))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().filter_map(expiring_resource).collect())
    }

    async fn find_expiring_agents(&self, until: DateTime<Utc>) -> Result<Vec<ExpiringResource>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<ExpiryRow> = forward_agents::table
            .filter(forward_agents::deleted_at.is_null())
            .filter(forward_agents::expires_at.is_not_null())
            .filter(forward_agents::expires_at.le(until))
            .order(forward_agents::expires_at.asc())
            .select((
                forward_agents::id,
                forward_agents::sid,
                forward_agents::name,
                forward_agents::expires_at,
            ))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().filter_map(expiring_resource).collect())
    }
}
