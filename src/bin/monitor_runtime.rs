//! Monitor Runtime - FBS order notifications and daily reports
//!
//! Wires configuration, SQLite store, marketplace clients, Telegram and the
//! report scheduler into one monitor loop. CTRL+C stops the loop after the
//! current tick.
//!
//! Usage:
//!   cargo run --release --bin monitor_runtime
//!
//! See `MonitorConfig::from_env` for the environment variables.

use chrono::Utc;
use dotenv::dotenv;
use fbs_monitor::monitor::{
    notifier::resolve_chat_id,
    runner::stop_on_signal,
    scheduler::{OrdersCountReport, ProductViewsReport, ReportScheduler},
    wb::{WbAnalyticsClient, WbContentClient, WbOrderClient},
    BatchFetcher, MonitorConfig, MonitorLoop, RetryPolicy, RetryableStore, SqliteStore, StopReason,
    TelegramNotifier,
};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 FBS Monitor Runtime");

    let config = MonitorConfig::from_env()?;

    info!("✅ Configuration loaded");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Poll interval: {}s", config.poll_interval.as_secs());
    info!(
        "   ├─ Orders report: {} (UTC{:+})",
        config.orders_report_time,
        config.report_offset.local_minus_utc() / 3600
    );
    match config.wb_analytics_api_key {
        Some(_) => info!("   └─ Views report: {}", config.views_report_time),
        None => info!("   └─ Views report: disabled (WB_ANALYTICS_API_KEY not set)"),
    }

    // Initialize database
    info!("🔧 Initializing database...");
    let sqlite = SqliteStore::open(&config.db_path)?;
    let store = RetryableStore::new(Arc::new(sqlite), config.store_policy());
    info!("✅ Database initialized");

    if let Some(days) = config.order_retention_days {
        let cutoff = Utc::now().timestamp() - i64::from(days) * 86_400;
        match store.prune_processed_before(cutoff).await {
            Ok(removed) => info!("🧹 Pruned {} processed orders older than {} days", removed, days),
            Err(e) => warn!("⚠️  Could not prune processed orders: {}", e),
        }
    }

    // Clients
    let chat_id = resolve_chat_id(&store, config.telegram_chat_id.as_deref()).await;
    if chat_id.is_none() {
        warn!("⚠️  No Telegram chat id configured (TELEGRAM_CHAT_ID)");
    }
    let notifier = Arc::new(TelegramNotifier::new(&config.telegram_bot_token, chat_id)?);
    let source = Arc::new(WbOrderClient::new(&config.wb_api_key, &config.wb_api_url)?);

    // Reports
    let mut scheduler = ReportScheduler::new(store.clone(), notifier.clone(), config.report_offset)
        .with_retry(config.report_retry_cooldown, config.report_max_retries);

    scheduler.add_report(
        "orders",
        config.orders_window(),
        Box::new(OrdersCountReport::new(store.clone(), config.report_offset)),
    );

    if let Some(analytics_key) = config.wb_analytics_api_key.as_deref() {
        let catalog = Arc::new(WbContentClient::new(analytics_key)?);
        let endpoint = Arc::new(WbAnalyticsClient::new(analytics_key)?);
        let fetch_policy = RetryPolicy::new(config.store_max_attempts, Duration::from_secs(2), 2);
        let fetcher = BatchFetcher::new(endpoint, fetch_policy, config.views_batch_delay);

        scheduler.add_report(
            "views",
            config.views_window(),
            Box::new(ProductViewsReport::new(catalog, fetcher, config.views_batch_size)),
        );
    }

    let monitor = MonitorLoop::new(source, notifier, store, scheduler, config.loop_settings());

    tokio::spawn(stop_on_signal(tokio::signal::ctrl_c(), monitor.stop_handle()));

    info!("🔄 Press CTRL+C to shutdown gracefully");
    let exit = monitor.start().await;

    let stats = monitor.statistics().await;
    info!("📊 Final status:");
    info!("   ├─ Cycles: {}", exit.cycles);
    info!("   ├─ Processed orders (total): {}", stats.processed_orders);
    info!("   └─ Reason: {:?}", exit.reason);

    match exit.reason {
        StopReason::Stopped => {
            info!("✅ Monitor runtime stopped");
            Ok(())
        }
        reason => Err(format!("monitor stopped: {:?}", reason).into()),
    }
}
