use std::sync::Arc;
use std::time::Duration;

use alert_core::{AlertContext, Config, SystemClock};
use alert_delivery::TelegramChannel;
use alert_scheduler::{Processor, ProcessorDeps};
use alert_store::{
    PgAccountSource, PgBindingRepository, PgFleetSource, PgTrafficStore, RedisAlertDeduplicator,
    RedisTrafficCache,
};
use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting fleet alert runner");

    let config = Config::from_env();
    let ctx = AlertContext::new(config).await?;
    let alerting = &ctx.config.alerting;

    let fleet = Arc::new(PgFleetSource::new(ctx.db_pool.clone()));
    let deps = ProcessorDeps {
        bindings: Arc::new(PgBindingRepository::new(ctx.db_pool.clone())),
        liveness: fleet.clone(),
        expiry: fleet,
        accounts: Arc::new(PgAccountSource::new(ctx.db_pool.clone())),
        traffic_store: Arc::new(PgTrafficStore::new(ctx.db_pool.clone(), alerting.business_tz())),
        traffic_cache: Arc::new(RedisTrafficCache::new(ctx.redis_pool.clone())),
        dedup: Arc::new(RedisAlertDeduplicator::new(ctx.redis_pool.clone())),
        channel: Arc::new(TelegramChannel::new(&ctx.config.telegram)?),
        clock: Arc::new(SystemClock),
    };

    let cancel = CancellationToken::new();
    let processor = Arc::new(Processor::new(deps, alerting, cancel.clone()));

    let offline_floor = Duration::from_secs(ctx.config.runner.offline_tick_seconds);
    let summary_tick = Duration::from_secs(ctx.config.runner.summary_tick_seconds.max(1));

    let offline_task = tokio::spawn(run_offline(processor.clone(), offline_floor));
    let summary_task = tokio::spawn(run_periodic(processor.clone(), summary_tick));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, stopping checkers");
    cancel.cancel();

    for task in [offline_task, summary_task] {
        if let Err(e) = task.await {
            tracing::error!("Checker task panicked: {}", e);
        }
    }

    tracing::info!("Fleet alert runner stopped");
    Ok(())
}

/// Offline and back-online checks. The pause between ticks follows the
/// shortest recheck interval any subscriber asked for, never below `floor`.
async fn run_offline(processor: Arc<Processor>, floor: Duration) {
    let cancel = processor.cancellation().clone();
    loop {
        if let Err(e) = processor.check_offline().await {
            tracing::error!("Offline check failed: {}", e);
        }
        if let Err(e) = processor.check_online_transitions().await {
            tracing::error!("Online transition check failed: {}", e);
        }

        let wait = processor.offline_recheck_interval().await.max(floor);
        tracing::debug!(wait_secs = wait.as_secs(), "Next offline check scheduled");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Summaries and expiry digests. Each is cheap when nothing is due, so they
/// share one fixed tick.
async fn run_periodic(processor: Arc<Processor>, tick: Duration) {
    let cancel = processor.cancellation().clone();
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if let Err(e) = processor.send_daily_summary().await {
            tracing::error!("Daily summary failed: {}", e);
        }
        if let Err(e) = processor.send_weekly_summary().await {
            tracing::error!("Weekly summary failed: {}", e);
        }
        if let Err(e) = processor.check_expiring().await {
            tracing::error!("Expiry digest failed: {}", e);
        }
    }
}
