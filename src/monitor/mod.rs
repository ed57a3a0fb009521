//! # FBS Order Monitor
//!
//! Polls the marketplace for new FBS orders, delivers each one to Telegram
//! exactly once and sends daily summary reports.
//!
//! ## Guarantees
//!
//! - An order is recorded as processed only after its notification was
//!   delivered. A failed delivery leaves it eligible for the next poll.
//! - A daily report is sent at most once per day across restarts and
//!   overlapping checks: the store's atomic `claim_daily` decides.
//!   A failed report rolls its claim back.
//! - Transient SQLite contention (busy/locked) is retried with exponential
//!   backoff; permanent errors surface immediately.
//!
//! ## Module Organization
//!
//! - `types` - Order and processed-order records
//! - `error` - Typed errors per layer
//! - `retry` - Backoff policy and `retry_with_backoff`
//! - `db` - `OrderStore` trait and SQLite implementation
//! - `store` - `RetryableStore`, the async retrying facade
//! - `source` - Collaborator traits (order source, notifier, views, catalog)
//! - `wb` - Marketplace HTTP clients
//! - `notifier` - Telegram notifier
//! - `format` - Message bodies
//! - `batch` - Chunked, paced views fetching
//! - `ingestion` - One order poll
//! - `scheduler` - Daily reports
//! - `runner` - The monitor loop
//! - `config` - Environment configuration

pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod ingestion;
pub mod notifier;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod types;
pub mod wb;

// Re-export commonly used types
pub use batch::{BatchFetcher, FetchOutcome};
pub use config::MonitorConfig;
pub use db::{OrderStore, SqliteStore};
pub use error::{ConfigError, CycleError, DeliveryError, FetchError, ReportError, SourceError, StoreError};
pub use ingestion::OrderIngestor;
pub use notifier::TelegramNotifier;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use runner::{LoopSettings, MonitorExit, MonitorLoop, MonitorStats, StopHandle, StopReason};
pub use scheduler::{DailyWindow, OrdersCountReport, ProductViewsReport, ReportBuilder, ReportScheduler};
pub use source::{Notifier, OrderSource, ProductCatalog, ViewsEndpoint};
pub use store::RetryableStore;
pub use types::{IngestSummary, Order, ProcessedOrderRecord};
