//! Monitor configuration from environment variables
//!
//! Loaded once at startup (after `dotenv`). Required keys fail with
//! `ConfigError::Missing`; malformed values fail with `ConfigError::Invalid`
//! rather than silently falling back to the default. Values that parse but
//! cannot drive the loop (zero failure budget, a report window shorter than
//! the gap between scheduler checks) are rejected the same way.

use super::error::ConfigError;
use super::retry::RetryPolicy;
use super::runner::LoopSettings;
use super::scheduler::DailyWindow;
use super::wb::DEFAULT_ORDERS_URL;
use chrono::{FixedOffset, NaiveTime};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Marketplace API token (`WB_API_KEY`)
    pub wb_api_key: String,

    /// New orders endpoint (`WB_API_URL`)
    pub wb_api_url: String,

    /// Token for content/analytics APIs; enables the views report
    pub wb_analytics_api_key: Option<String>,

    pub telegram_bot_token: String,

    /// Fallback chat id when none is persisted yet
    pub telegram_chat_id: Option<String>,

    pub db_path: String,

    pub poll_interval: Duration,
    pub max_consecutive_failures: u32,
    pub failure_cooldown: Duration,

    pub orders_report_time: NaiveTime,
    pub views_report_time: NaiveTime,
    pub report_window: Duration,
    pub report_check_every: u32,
    pub report_offset: FixedOffset,
    pub report_retry_cooldown: Duration,
    pub report_max_retries: u32,

    pub views_batch_size: usize,
    pub views_batch_delay: Duration,

    pub store_max_attempts: u32,
    pub store_retry_base: Duration,

    /// Processed orders older than this are pruned at startup
    pub order_retention_days: Option<u32>,
}

impl MonitorConfig {
    /// Load configuration from the process environment
    ///
    /// Environment variables:
    /// - `WB_API_KEY` (required)
    /// - `TELEGRAM_BOT_TOKEN` (required)
    /// - `TELEGRAM_CHAT_ID`, `WB_ANALYTICS_API_KEY`, `ORDER_RETENTION_DAYS` (optional)
    /// - `WB_API_URL` (default: marketplace orders/new)
    /// - `WB_POLL_INTERVAL` seconds (default: 180)
    /// - `DB_PATH` (default: orders.db)
    /// - `ORDERS_REPORT_TIME` / `VIEWS_REPORT_TIME` (default: 00:00:00 / 05:00:00)
    /// - `REPORT_WINDOW_SECS` (default: 60, at least one check gap)
    /// - `REPORT_CHECK_EVERY_TICKS` (default: 10, at least 1)
    /// - `REPORT_UTC_OFFSET_MINUTES` (default: 180)
    /// - `REPORT_RETRY_COOLDOWN_SECS` (default: 300), `REPORT_MAX_RETRIES` (default: 3)
    /// - `MAX_CONSECUTIVE_FAILURES` (default: 5, at least 1), `FAILURE_COOLDOWN_SECS` (default: 30)
    /// - `VIEWS_BATCH_SIZE` (default: 20), `VIEWS_BATCH_DELAY_MS` (default: 20000)
    /// - `STORE_MAX_ATTEMPTS` (default: 5), `STORE_RETRY_BASE_MS` (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let offset_minutes: i32 = vars.parsed("REPORT_UTC_OFFSET_MINUTES", 180)?;
        let report_offset = FixedOffset::east_opt(offset_minutes * 60).ok_or_else(|| ConfigError::Invalid {
            key: "REPORT_UTC_OFFSET_MINUTES",
            value: offset_minutes.to_string(),
        })?;

        let config = Self {
            wb_api_key: vars.required("WB_API_KEY")?,
            wb_api_url: vars
                .optional("WB_API_URL")
                .unwrap_or_else(|| DEFAULT_ORDERS_URL.to_string()),
            wb_analytics_api_key: vars.optional("WB_ANALYTICS_API_KEY"),
            telegram_bot_token: vars.required("TELEGRAM_BOT_TOKEN")?,
            telegram_chat_id: vars.optional("TELEGRAM_CHAT_ID"),
            db_path: vars.optional("DB_PATH").unwrap_or_else(|| "orders.db".to_string()),

            poll_interval: Duration::from_secs(vars.parsed("WB_POLL_INTERVAL", 180)?),
            max_consecutive_failures: vars.parsed("MAX_CONSECUTIVE_FAILURES", 5)?,
            failure_cooldown: Duration::from_secs(vars.parsed("FAILURE_COOLDOWN_SECS", 30)?),

            orders_report_time: vars.time("ORDERS_REPORT_TIME", NaiveTime::MIN)?,
            views_report_time: vars.time("VIEWS_REPORT_TIME", NaiveTime::from_hms_opt(5, 0, 0).unwrap_or(NaiveTime::MIN))?,
            report_window: Duration::from_secs(vars.parsed("REPORT_WINDOW_SECS", 60)?),
            report_check_every: vars.parsed("REPORT_CHECK_EVERY_TICKS", 10)?,
            report_offset,
            report_retry_cooldown: Duration::from_secs(vars.parsed("REPORT_RETRY_COOLDOWN_SECS", 300)?),
            report_max_retries: vars.parsed("REPORT_MAX_RETRIES", 3)?,

            views_batch_size: vars.parsed("VIEWS_BATCH_SIZE", 20)?,
            views_batch_delay: Duration::from_millis(vars.parsed("VIEWS_BATCH_DELAY_MS", 20_000)?),

            store_max_attempts: vars.parsed("STORE_MAX_ATTEMPTS", 5)?,
            store_retry_base: Duration::from_millis(vars.parsed("STORE_RETRY_BASE_MS", 100)?),

            order_retention_days: vars.optional_parsed("ORDER_RETENTION_DAYS")?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_CONSECUTIVE_FAILURES",
                value: "0".to_string(),
            });
        }
        if self.report_check_every == 0 {
            return Err(ConfigError::Invalid {
                key: "REPORT_CHECK_EVERY_TICKS",
                value: "0".to_string(),
            });
        }

        let check_gap = self.loop_settings().tick * self.report_check_every;
        if self.report_window < check_gap {
            log::error!(
                "❌ REPORT_WINDOW_SECS={} is shorter than the {}s between report checks",
                self.report_window.as_secs(),
                check_gap.as_secs()
            );
            return Err(ConfigError::Invalid {
                key: "REPORT_WINDOW_SECS",
                value: self.report_window.as_secs().to_string(),
            });
        }

        Ok(())
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            poll_interval: self.poll_interval,
            report_check_every: self.report_check_every,
            failure_cooldown: self.failure_cooldown,
            max_consecutive_failures: self.max_consecutive_failures,
            ..LoopSettings::default()
        }
    }

    pub fn store_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.store_max_attempts, self.store_retry_base, 2)
    }

    pub fn orders_window(&self) -> DailyWindow {
        DailyWindow::new(self.orders_report_time, self.report_window)
    }

    pub fn views_window(&self) -> DailyWindow {
        DailyWindow::new(self.views_report_time, self.report_window)
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; empty counts as unset
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn optional_parsed<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        match self.optional(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    fn parsed<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        Ok(self.optional_parsed(key)?.unwrap_or(default))
    }

    /// `HH:MM:SS` or `HH:MM`
    fn time(&self, key: &'static str, default: NaiveTime) -> Result<NaiveTime, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => NaiveTime::parse_from_str(&value, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(&value, "%H:%M"))
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<MonitorConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MonitorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [("WB_API_KEY", "wb-token"), ("TELEGRAM_BOT_TOKEN", "123:abc")];

    #[test]
    fn test_default_config() {
        let config = load(&REQUIRED).unwrap();

        assert_eq!(config.wb_api_url, DEFAULT_ORDERS_URL);
        assert_eq!(config.db_path, "orders.db");
        assert_eq!(config.poll_interval, Duration::from_secs(180));
        assert_eq!(config.orders_report_time, NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        assert_eq!(config.views_report_time, NaiveTime::from_hms_opt(5, 0, 0).unwrap());
        assert_eq!(config.report_window, Duration::from_secs(60));
        assert_eq!(config.report_check_every, 10);
        assert_eq!(config.report_offset.local_minus_utc(), 3 * 3600);
        assert_eq!(config.report_max_retries, 3);
        assert_eq!(config.max_consecutive_failures, 5);
        assert_eq!(config.views_batch_size, 20);
        assert_eq!(config.views_batch_delay, Duration::from_secs(20));
        assert_eq!(config.store_max_attempts, 5);
        assert!(config.telegram_chat_id.is_none());
        assert!(config.wb_analytics_api_key.is_none());
        assert!(config.order_retention_days.is_none());
    }

    #[test]
    fn test_custom_config() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("TELEGRAM_CHAT_ID", "-100200"),
            ("WB_POLL_INTERVAL", "60"),
            ("DB_PATH", "/tmp/test.db"),
            ("ORDERS_REPORT_TIME", "23:30"),
            ("REPORT_UTC_OFFSET_MINUTES", "-120"),
            ("VIEWS_BATCH_SIZE", "5"),
            ("ORDER_RETENTION_DAYS", "30"),
        ]);

        let config = load(&pairs).unwrap();

        assert_eq!(config.telegram_chat_id.as_deref(), Some("-100200"));
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.db_path, "/tmp/test.db");
        assert_eq!(config.orders_report_time, NaiveTime::from_hms_opt(23, 30, 0).unwrap());
        assert_eq!(config.report_offset.local_minus_utc(), -7200);
        assert_eq!(config.views_batch_size, 5);
        assert_eq!(config.order_retention_days, Some(30));

        let settings = config.loop_settings();
        assert_eq!(settings.poll_interval, Duration::from_secs(60));
        assert_eq!(settings.tick, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_required_keys() {
        assert!(matches!(
            load(&[("TELEGRAM_BOT_TOKEN", "t")]),
            Err(ConfigError::Missing("WB_API_KEY"))
        ));
        assert!(matches!(
            load(&[("WB_API_KEY", "k"), ("TELEGRAM_BOT_TOKEN", "  ")]),
            Err(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("WB_POLL_INTERVAL", "soon"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid { key: "WB_POLL_INTERVAL", .. })
        ));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("VIEWS_REPORT_TIME", "25:00"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid { key: "VIEWS_REPORT_TIME", .. })
        ));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("REPORT_UTC_OFFSET_MINUTES", "100000"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid { key: "REPORT_UTC_OFFSET_MINUTES", .. })
        ));
    }

    #[test]
    fn test_zero_failure_budget_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MAX_CONSECUTIVE_FAILURES", "0"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid { key: "MAX_CONSECUTIVE_FAILURES", .. })
        ));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("REPORT_CHECK_EVERY_TICKS", "0"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid { key: "REPORT_CHECK_EVERY_TICKS", .. })
        ));
    }

    #[test]
    fn test_window_shorter_than_check_gap_is_rejected() {
        // Default gap is 10 ticks of 1s
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("REPORT_WINDOW_SECS", "5"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid { key: "REPORT_WINDOW_SECS", value }) if value == "5"
        ));

        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("REPORT_WINDOW_SECS", "30"), ("REPORT_CHECK_EVERY_TICKS", "31")]);
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::Invalid { key: "REPORT_WINDOW_SECS", .. })
        ));

        // Equal to the gap still gives every window one check
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("REPORT_WINDOW_SECS", "10"), ("REPORT_CHECK_EVERY_TICKS", "10")]);
        assert_eq!(load(&pairs).unwrap().report_window, Duration::from_secs(10));
    }

    #[test]
    fn test_empty_optional_is_unset() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TELEGRAM_CHAT_ID", ""));
        pairs.push(("WB_ANALYTICS_API_KEY", " "));

        let config = load(&pairs).unwrap();

        assert!(config.telegram_chat_id.is_none());
        assert!(config.wb_analytics_api_key.is_none());
    }
}
