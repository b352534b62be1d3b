use anyhow::{anyhow, Result};
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use std::sync::Arc;
use tokio::time::Duration;

use crate::config::DatabaseConfig;
use crate::mask_credentials;

pub type DbPool = Pool<AsyncPgConnection>;

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn create_pool(config: &DatabaseConfig) -> Result<Arc<DbPool>> {
    tracing::info!(url = %mask_credentials(&config.url), "Setting up database connection pool");

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.url);

    let pool = Pool::builder(manager)
        .max_size(config.max_connections as usize)
        .build()
        .map_err(|e| anyhow!("Failed to create connection pool: {}", e))?;

    let mut last_error = anyhow!("No database connection attempt was made");
    for attempt in 1..=CONNECT_ATTEMPTS {
        match tokio::time::timeout(CONNECT_TIMEOUT, pool.get()).await {
            Ok(Ok(_conn)) => {
                tracing::info!(attempt, "Database connection established");
                return Ok(Arc::new(pool));
            }
            Ok(Err(e)) => {
                tracing::warn!(attempt, "Database connection failed: {}", e);
                last_error = anyhow!("Database connection failed: {}", e);
            }
            Err(_) => {
                tracing::warn!(attempt, "Database connection timed out");
                last_error = anyhow!("Database connection timed out");
            }
        }

        if attempt < CONNECT_ATTEMPTS {
            let wait_time = Duration::from_secs(2_u64.pow(attempt - 1));
            tokio::time::sleep(wait_time).await;
        }
    }

    tracing::error!("All database connection attempts failed");
    Err(last_error)
}
