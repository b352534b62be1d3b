//! Alert locks. The key is the lock and expiry is the release, so a crashed
//! holder can never wedge an alert past its cooldown.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use alert_core::error::DedupError;
use alert_core::ports::AlertDeduplicator;
use alert_core::redis::get_connection;
use alert_core::{AlertKind, RedisPool};
use async_trait::async_trait;
use tokio::time::Instant;

pub fn lock_key(kind: AlertKind, resource_id: i64) -> String {
    format!("alert:lock:{}:{}", kind.as_str(), resource_id)
}

/// Cross-instance deduplicator backed by `SET key token NX PX ttl`.
pub struct RedisAlertDeduplicator {
    pool: RedisPool,
    holder: String,
}

impl RedisAlertDeduplicator {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            holder: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
impl AlertDeduplicator for RedisAlertDeduplicator {
    async fn try_acquire_alert_lock(
        &self,
        kind: AlertKind,
        resource_id: i64,
        cooldown: Duration,
    ) -> Result<bool, DedupError> {
        let mut conn = get_connection(&self.pool)
            .await
            .map_err(|e| DedupError::Other(e.to_string()))?;
        let key = lock_key(kind, resource_id);
        // PX rejects zero.
        let ttl_ms = (cooldown.as_millis() as u64).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&self.holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        let acquired = reply.is_some();
        tracing::debug!(%key, acquired, "Alert lock attempt");
        Ok(acquired)
    }

    async fn clear_alert(&self, kind: AlertKind, resource_id: i64) -> Result<(), DedupError> {
        let mut conn = get_connection(&self.pool)
            .await
            .map_err(|e| DedupError::Other(e.to_string()))?;
        let key = lock_key(kind, resource_id);

        let removed: i64 = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
        tracing::debug!(%key, removed, "Alert lock cleared");
        Ok(())
    }
}

/// Process-local deduplicator for single-instance deployments.
#[derive(Default)]
pub struct MemoryAlertDeduplicator {
    locks: Mutex<HashMap<String, Instant>>,
}

impl MemoryAlertDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, kind: AlertKind, resource_id: i64) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        matches!(locks.get(&lock_key(kind, resource_id)), Some(expiry) if *expiry > Instant::now())
    }
}

#[async_trait]
impl AlertDeduplicator for MemoryAlertDeduplicator {
    async fn try_acquire_alert_lock(
        &self,
        kind: AlertKind,
        resource_id: i64,
        cooldown: Duration,
    ) -> Result<bool, DedupError> {
        let now = Instant::now();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, expiry| *expiry > now);

        let key = lock_key(kind, resource_id);
        if locks.contains_key(&key) {
            return Ok(false);
        }
        locks.insert(key, now + cooldown);
        Ok(true)
    }

    async fn clear_alert(&self, kind: AlertKind, resource_id: i64) -> Result<(), DedupError> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&lock_key(kind, resource_id));
        Ok(())
    }
}
