use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use message_retry_cell::{MessageRetryQueue, RedisMessageStore, RetryQueueConfig, SupabaseMessageSender};
use shared_config::AppConfig;
use shared_utils::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting message sweeper");

    let config = AppConfig::from_env();
    if config.redis_url.is_none() {
        warn!("REDIS_URL not set, falling back to localhost");
    }

    let store = RedisMessageStore::new(&config)
        .await
        .context("Failed to connect to the message store")?;
    let sender = SupabaseMessageSender::new(&config);

    let queue = Arc::new(MessageRetryQueue::new(
        Arc::new(store),
        Arc::new(sender),
        Arc::new(SystemClock),
        RetryQueueConfig::default(),
    ));

    let period = Duration::from_secs(config.message_sweep_interval_seconds.max(1));
    let mut ticks = interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Sweeping every {:?}", period);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                queue.enqueue_sweep();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    match queue.permanently_failed().await {
        Ok(failed) if !failed.is_empty() => {
            warn!("{} messages exhausted their retries", failed.len());
        }
        Ok(_) => {}
        Err(e) => warn!("Could not query exhausted messages: {}", e),
    }

    info!("Message sweeper stopped");
    Ok(())
}
