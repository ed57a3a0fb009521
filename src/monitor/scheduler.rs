//! Daily report scheduler
//!
//! Each report is an independent state machine:
//!
//! ```text
//! Idle --(due && claim_daily)--> Claimed --build+send ok--> Sent
//!                                    |
//!                                    +--error--> Failed --(rollback)--> Idle
//! ```
//!
//! The scheduler keeps no timers. The monitor loop calls `check()` every few
//! seconds and the scheduler reacts to wall-clock time. A report is due inside
//! its window, and also any time later the same day while it has not been
//! attempted yet, so a check that lands after a missed window still catches
//! up. Which process sends today's report is decided only by
//! `RetryableStore::claim_daily` on the report's `last_<name>_report_date`
//! key, so overlapping checks and restarts cannot double-send. A failed build
//! or send clears the claim, making the report eligible again on a later
//! in-window check or after the retry cool-down.

use super::batch::BatchFetcher;
use super::error::ReportError;
use super::format::{format_daily_statistics, format_views_report};
use super::source::{Notifier, ProductCatalog};
use super::store::RetryableStore;
use super::types::{iso_date, report_date_key};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Half-open daily interval `[start, start + width)` in report-local time.
/// Wraps past midnight when `start + width` exceeds 24h.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyWindow {
    pub start: NaiveTime,
    pub width: Duration,
}

impl DailyWindow {
    pub fn new(start: NaiveTime, width: Duration) -> Self {
        Self { start, width }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let offset = (millis_of_day(time) - millis_of_day(self.start)).rem_euclid(MILLIS_PER_DAY);
        (offset as u128) < self.width.as_millis()
    }

    /// Whether today's window has started by `time`, ignoring its end
    pub fn has_opened(&self, time: NaiveTime) -> bool {
        millis_of_day(time) >= millis_of_day(self.start)
    }
}

fn millis_of_day(time: NaiveTime) -> i64 {
    time.num_seconds_from_midnight() as i64 * 1000 + (time.nanosecond() / 1_000_000).min(999) as i64
}

/// Produces the message body of a report for `report_date`.
#[async_trait]
pub trait ReportBuilder: Send + Sync {
    async fn build(&self, report_date: NaiveDate) -> Result<String, ReportError>;
}

/// Number of orders recorded as processed during `report_date`.
pub struct OrdersCountReport {
    store: RetryableStore,
    offset: FixedOffset,
}

impl OrdersCountReport {
    pub fn new(store: RetryableStore, offset: FixedOffset) -> Self {
        Self { store, offset }
    }

    /// Unix-second bounds `[start, end)` of `date` in the report offset.
    pub fn day_bounds(&self, date: NaiveDate) -> (i64, i64) {
        let local_midnight = date.and_time(NaiveTime::MIN).and_utc().timestamp();
        let start = local_midnight - self.offset.local_minus_utc() as i64;
        (start, start + 86_400)
    }
}

#[async_trait]
impl ReportBuilder for OrdersCountReport {
    async fn build(&self, report_date: NaiveDate) -> Result<String, ReportError> {
        let (start, end) = self.day_bounds(report_date);
        let count = self.store.count_processed_between(start, end).await?;
        Ok(format_daily_statistics(count, report_date))
    }
}

/// Per-product card views for `report_date`, fetched in paced chunks.
pub struct ProductViewsReport {
    catalog: Arc<dyn ProductCatalog>,
    fetcher: BatchFetcher,
    batch_size: usize,
}

impl ProductViewsReport {
    pub fn new(catalog: Arc<dyn ProductCatalog>, fetcher: BatchFetcher, batch_size: usize) -> Self {
        Self {
            catalog,
            fetcher,
            batch_size,
        }
    }
}

#[async_trait]
impl ReportBuilder for ProductViewsReport {
    async fn build(&self, report_date: NaiveDate) -> Result<String, ReportError> {
        let ids = self.catalog.list_product_ids().await?;
        let outcome = self.fetcher.fetch_views(&ids, report_date, self.batch_size).await;
        if outcome.all_failed() {
            return Err(ReportError::Build(format!(
                "all {} views chunks failed for {}",
                outcome.total, report_date
            )));
        }
        Ok(format_views_report(&outcome.views, report_date))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPhase {
    Idle,
    Claimed,
    Sent,
    Failed,
}

/// What a single check did for one report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Window not open yet, today's attempt already made, or no retry due
    NotDue,
    /// Another check or process already holds today's claim
    AlreadyClaimed,
    /// A check in this process is building the same report right now
    Busy,
    Sent,
    /// Build or send failed; claim rolled back
    Failed,
    /// Claim could not be evaluated
    StoreUnavailable,
}

#[derive(Debug, Clone)]
struct DayState {
    date: NaiveDate,
    phase: ReportPhase,
    failures: u32,
    retry_at: Option<DateTime<FixedOffset>>,
}

impl DayState {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            phase: ReportPhase::Idle,
            failures: 0,
            retry_at: None,
        }
    }
}

struct ScheduledReport {
    name: String,
    window: DailyWindow,
    builder: Box<dyn ReportBuilder>,
    busy: AtomicBool,
    state: Mutex<Option<DayState>>,
}

/// Clears the per-report busy flag when the check finishes.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ReportScheduler {
    store: RetryableStore,
    notifier: Arc<dyn Notifier>,
    offset: FixedOffset,
    retry_cooldown: Duration,
    max_retries: u32,
    reports: Vec<ScheduledReport>,
}

impl ReportScheduler {
    pub fn new(store: RetryableStore, notifier: Arc<dyn Notifier>, offset: FixedOffset) -> Self {
        Self {
            store,
            notifier,
            offset,
            retry_cooldown: Duration::from_secs(300),
            max_retries: 3,
            reports: Vec::new(),
        }
    }

    /// Cool-down after a failure and how many such retries a report gets per day
    pub fn with_retry(mut self, cooldown: Duration, max_retries: u32) -> Self {
        self.retry_cooldown = cooldown;
        self.max_retries = max_retries;
        self
    }

    /// Register a report. Names must be unique; they select the claim key.
    pub fn add_report(&mut self, name: &str, window: DailyWindow, builder: Box<dyn ReportBuilder>) {
        if self.reports.iter().any(|r| r.name == name) {
            log::warn!("⚠️  Report {} already registered, ignoring duplicate", name);
            return;
        }
        log::info!(
            "🗓️  Report {} scheduled at {} (window {}s)",
            name,
            window.start,
            window.width.as_secs()
        );
        self.reports.push(ScheduledReport {
            name: name.to_string(),
            window,
            builder,
            busy: AtomicBool::new(false),
            state: Mutex::new(None),
        });
    }

    pub fn report_names(&self) -> Vec<&str> {
        self.reports.iter().map(|r| r.name.as_str()).collect()
    }

    /// Phase of `name` for the day it was last checked, if ever checked
    pub fn phase(&self, name: &str) -> Option<ReportPhase> {
        let report = self.reports.iter().find(|r| r.name == name)?;
        let state = report.state.lock().ok()?;
        state.as_ref().map(|s| s.phase)
    }

    pub async fn check(&self) -> Vec<(String, CheckOutcome)> {
        self.check_at(Utc::now()).await
    }

    /// Evaluate every report against `now`.
    pub async fn check_at(&self, now: DateTime<Utc>) -> Vec<(String, CheckOutcome)> {
        let local = now.with_timezone(&self.offset);
        let mut outcomes = Vec::with_capacity(self.reports.len());

        for report in &self.reports {
            let outcome = self.check_report(report, local).await;
            outcomes.push((report.name.clone(), outcome));
        }

        outcomes
    }

    fn update_state<F>(&self, report: &ScheduledReport, today: NaiveDate, f: F)
    where
        F: FnOnce(&mut DayState),
    {
        let mut guard = match report.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let state = guard.get_or_insert_with(|| DayState::new(today));
        if state.date != today {
            *state = DayState::new(today);
        }
        f(state);
    }

    /// Window opened earlier today and this process has not attempted the
    /// report since.
    fn catch_up_due(&self, report: &ScheduledReport, local: DateTime<FixedOffset>) -> bool {
        if !report.window.has_opened(local.time()) {
            return false;
        }
        let today = local.date_naive();
        let Ok(guard) = report.state.lock() else {
            return false;
        };
        match guard.as_ref() {
            Some(state) if state.date == today => state.phase == ReportPhase::Idle,
            _ => true,
        }
    }

    fn retry_due(&self, report: &ScheduledReport, local: DateTime<FixedOffset>) -> bool {
        let today = local.date_naive();
        let Ok(guard) = report.state.lock() else {
            return false;
        };
        match guard.as_ref() {
            Some(state) if state.date == today && state.phase == ReportPhase::Failed => {
                state.failures <= self.max_retries
                    && state.retry_at.map(|at| local >= at).unwrap_or(true)
            }
            _ => false,
        }
    }

    async fn check_report(&self, report: &ScheduledReport, local: DateTime<FixedOffset>) -> CheckOutcome {
        let today = local.date_naive();
        let in_window = report.window.contains(local.time());

        let catching_up = !in_window && self.catch_up_due(report, local);

        if !in_window && !catching_up && !self.retry_due(report, local) {
            return CheckOutcome::NotDue;
        }
        if catching_up {
            log::info!(
                "⏰ Report {} missed its {} window, catching up at {}",
                report.name,
                report.window.start,
                local.time().format("%H:%M:%S")
            );
        }

        if report.busy.swap(true, Ordering::AcqRel) {
            log::debug!("Report {} is already being built", report.name);
            return CheckOutcome::Busy;
        }
        let _busy = BusyGuard(&report.busy);

        let key = report_date_key(&report.name);
        let today_iso = iso_date(today);

        match self.store.claim_daily(&key, &today_iso).await {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("Report {} already claimed for {}", report.name, today_iso);
                self.update_state(report, today, |s| {
                    if s.phase == ReportPhase::Idle {
                        s.phase = ReportPhase::Sent;
                    }
                });
                return CheckOutcome::AlreadyClaimed;
            }
            Err(e) => {
                log::error!("❌ Could not claim report {} for {}: {}", report.name, today_iso, e);
                return CheckOutcome::StoreUnavailable;
            }
        }

        self.update_state(report, today, |s| s.phase = ReportPhase::Claimed);
        log::info!("📣 Report {} claimed for {}", report.name, today_iso);

        let report_date = today.pred_opt().unwrap_or(today);
        let result = match report.builder.build(report_date).await {
            Ok(message) => self.notifier.send(&message).await.map_err(ReportError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.update_state(report, today, |s| {
                    s.phase = ReportPhase::Sent;
                    s.retry_at = None;
                });
                log::info!("✅ Report {} for {} sent", report.name, report_date);
                CheckOutcome::Sent
            }
            Err(e) => {
                log::error!("❌ Report {} for {} failed: {}", report.name, report_date, e);

                if let Err(rollback_err) = self.store.clear_setting(&key).await {
                    log::error!(
                        "❌ Could not roll back claim {} - report {} is lost for {}: {}",
                        key,
                        report.name,
                        today_iso,
                        rollback_err
                    );
                }

                let retry_at = chrono::Duration::from_std(self.retry_cooldown)
                    .ok()
                    .map(|cooldown| local + cooldown);
                self.update_state(report, today, |s| {
                    s.phase = ReportPhase::Failed;
                    s.failures += 1;
                    s.retry_at = retry_at;
                });
                CheckOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ingestion::tests::RecordingNotifier;
    use crate::monitor::store::tests::{fast_policy, MemoryStore};
    use chrono::TimeZone;
    use std::sync::atomic::AtomicU32;

    /// Builder that fails while `failures_left > 0`, optionally slow.
    #[derive(Default)]
    struct TestBuilder {
        failures_left: AtomicU32,
        builds: AtomicU32,
        delay_ms: u64,
        last_date: Mutex<Option<NaiveDate>>,
    }

    #[async_trait]
    impl ReportBuilder for Arc<TestBuilder> {
        async fn build(&self, report_date: NaiveDate) -> Result<String, ReportError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            *self.last_date.lock().unwrap() = Some(report_date);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ReportError::Build("upstream down".into()));
            }
            Ok(format!("report for {}", report_date))
        }
    }

    struct Harness {
        memory: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        scheduler: ReportScheduler,
    }

    fn utc_offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, h, m, s).unwrap()
    }

    fn harness(builders: Vec<(&str, NaiveTime, Arc<TestBuilder>)>) -> Harness {
        let memory = Arc::new(MemoryStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let store = RetryableStore::new(memory.clone(), fast_policy(2));
        let mut scheduler = ReportScheduler::new(store, notifier.clone(), utc_offset())
            .with_retry(Duration::from_secs(300), 2);
        for (name, start, builder) in builders {
            scheduler.add_report(name, DailyWindow::new(start, Duration::from_secs(60)), Box::new(builder));
        }
        Harness {
            memory,
            notifier,
            scheduler,
        }
    }

    fn midnight() -> NaiveTime {
        NaiveTime::from_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_window_is_half_open() {
        let window = DailyWindow::new(NaiveTime::from_hms_opt(5, 0, 0).unwrap(), Duration::from_secs(5));

        assert!(!window.contains(NaiveTime::from_hms_opt(4, 59, 59).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(5, 0, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_milli_opt(5, 0, 4, 999).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(5, 0, 5).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(17, 0, 0).unwrap()));
    }

    #[test]
    fn test_window_wraps_midnight() {
        let window = DailyWindow::new(NaiveTime::from_hms_opt(23, 59, 50).unwrap(), Duration::from_secs(20));

        assert!(window.contains(NaiveTime::from_hms_opt(23, 59, 55).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(0, 0, 9).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(0, 0, 10).unwrap()));
    }

    #[test]
    fn test_zero_width_window_never_matches() {
        let window = DailyWindow::new(midnight(), Duration::ZERO);
        assert!(!window.contains(midnight()));
    }

    #[tokio::test]
    async fn test_three_checks_in_window_send_once() {
        let builder = Arc::new(TestBuilder::default());
        let h = harness(vec![("orders", midnight(), builder.clone())]);

        let first = h.scheduler.check_at(at(0, 0, 1)).await;
        let second = h.scheduler.check_at(at(0, 0, 11)).await;
        let third = h.scheduler.check_at(at(0, 0, 21)).await;

        assert_eq!(first, vec![("orders".to_string(), CheckOutcome::Sent)]);
        assert_eq!(second[0].1, CheckOutcome::AlreadyClaimed);
        assert_eq!(third[0].1, CheckOutcome::AlreadyClaimed);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.memory.settings.lock().unwrap().get("last_orders_report_date").map(String::as_str),
            Some("2024-05-02")
        );
        assert_eq!(h.scheduler.phase("orders"), Some(ReportPhase::Sent));
    }

    #[tokio::test]
    async fn test_report_covers_previous_day() {
        let builder = Arc::new(TestBuilder::default());
        let h = harness(vec![("orders", midnight(), builder.clone())]);

        h.scheduler.check_at(at(0, 0, 0)).await;

        assert_eq!(
            *builder.last_date.lock().unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 1)
        );
    }

    #[test]
    fn test_window_has_opened() {
        let window = DailyWindow::new(NaiveTime::from_hms_opt(5, 0, 0).unwrap(), Duration::from_secs(5));

        assert!(!window.has_opened(NaiveTime::from_hms_opt(4, 59, 59).unwrap()));
        assert!(window.has_opened(NaiveTime::from_hms_opt(5, 0, 0).unwrap()));
        assert!(window.has_opened(NaiveTime::from_hms_opt(23, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_before_window_is_noop() {
        let builder = Arc::new(TestBuilder::default());
        let five = NaiveTime::from_hms_opt(5, 0, 0).unwrap();
        let h = harness(vec![("orders", five, builder.clone())]);

        let outcome = h.scheduler.check_at(at(4, 59, 59)).await;

        assert_eq!(outcome[0].1, CheckOutcome::NotDue);
        assert_eq!(builder.builds.load(Ordering::SeqCst), 0);
        assert!(h.memory.settings.lock().unwrap().is_empty());
        assert_eq!(h.scheduler.phase("orders"), None);
    }

    #[tokio::test]
    async fn test_missed_window_is_caught_up_once() {
        let builder = Arc::new(TestBuilder::default());
        let h = harness(vec![("orders", midnight(), builder.clone())]);

        // First check of the day lands long after the 60s window closed
        let late = h.scheduler.check_at(at(0, 15, 0)).await;
        let later = h.scheduler.check_at(at(0, 15, 10)).await;
        let evening = h.scheduler.check_at(at(20, 0, 0)).await;

        assert_eq!(late[0].1, CheckOutcome::Sent);
        assert_eq!(later[0].1, CheckOutcome::NotDue);
        assert_eq!(evening[0].1, CheckOutcome::NotDue);
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
        assert_eq!(
            *builder.last_date.lock().unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 1)
        );
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_catch_up_after_restart_respects_claim() {
        let builder = Arc::new(TestBuilder::default());
        let h = harness(vec![("orders", midnight(), builder.clone())]);
        h.scheduler.check_at(at(0, 0, 1)).await;

        let store = RetryableStore::new(h.memory.clone(), fast_policy(2));
        let mut restarted = ReportScheduler::new(store, h.notifier.clone(), utc_offset());
        restarted.add_report(
            "orders",
            DailyWindow::new(midnight(), Duration::from_secs(60)),
            Box::new(builder.clone()),
        );

        // Restart after the window: the claim settles it without a resend
        assert_eq!(restarted.check_at(at(3, 0, 0)).await[0].1, CheckOutcome::AlreadyClaimed);
        let calls = h.memory.calls.load(Ordering::SeqCst);
        assert_eq!(restarted.check_at(at(3, 0, 10)).await[0].1, CheckOutcome::NotDue);
        assert_eq!(h.memory.calls.load(Ordering::SeqCst), calls);
        assert_eq!(restarted.phase("orders"), Some(ReportPhase::Sent));
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restart_does_not_resend() {
        let builder = Arc::new(TestBuilder::default());
        let h = harness(vec![("orders", midnight(), builder.clone())]);
        h.scheduler.check_at(at(0, 0, 1)).await;

        // Fresh scheduler over the same store, as after a process restart
        let store = RetryableStore::new(h.memory.clone(), fast_policy(2));
        let mut restarted = ReportScheduler::new(store, h.notifier.clone(), utc_offset());
        restarted.add_report(
            "orders",
            DailyWindow::new(midnight(), Duration::from_secs(60)),
            Box::new(builder.clone()),
        );

        let outcome = restarted.check_at(at(0, 0, 30)).await;

        assert_eq!(outcome[0].1, CheckOutcome::AlreadyClaimed);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_later_check_retries() {
        let builder = Arc::new(TestBuilder::default());
        builder.failures_left.store(1, Ordering::SeqCst);
        let h = harness(vec![("orders", midnight(), builder.clone())]);

        let first = h.scheduler.check_at(at(0, 0, 1)).await;
        assert_eq!(first[0].1, CheckOutcome::Failed);
        assert!(!h.memory.settings.lock().unwrap().contains_key("last_orders_report_date"));
        assert_eq!(h.scheduler.phase("orders"), Some(ReportPhase::Failed));

        let second = h.scheduler.check_at(at(0, 0, 11)).await;
        assert_eq!(second[0].1, CheckOutcome::Sent);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_rolls_back_claim() {
        let builder = Arc::new(TestBuilder::default());
        let h = harness(vec![("orders", midnight(), builder.clone())]);
        h.notifier.fail_on("report for");

        let outcome = h.scheduler.check_at(at(0, 0, 1)).await;

        assert_eq!(outcome[0].1, CheckOutcome::Failed);
        assert!(h.memory.settings.lock().unwrap().is_empty());
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_after_cooldown_outside_window() {
        let builder = Arc::new(TestBuilder::default());
        builder.failures_left.store(1, Ordering::SeqCst);
        let h = harness(vec![("orders", midnight(), builder.clone())]);

        h.scheduler.check_at(at(0, 0, 50)).await;

        // Window over, cool-down (300s) not yet elapsed
        assert_eq!(h.scheduler.check_at(at(0, 3, 0)).await[0].1, CheckOutcome::NotDue);
        // Cool-down elapsed
        assert_eq!(h.scheduler.check_at(at(0, 6, 0)).await[0].1, CheckOutcome::Sent);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded_per_day() {
        let builder = Arc::new(TestBuilder::default());
        builder.failures_left.store(100, Ordering::SeqCst);
        let h = harness(vec![("orders", midnight(), builder.clone())]);

        h.scheduler.check_at(at(0, 0, 1)).await;
        // max_retries = 2: two cool-down retries, then nothing more today
        assert_eq!(h.scheduler.check_at(at(0, 10, 0)).await[0].1, CheckOutcome::Failed);
        assert_eq!(h.scheduler.check_at(at(0, 20, 0)).await[0].1, CheckOutcome::Failed);
        assert_eq!(h.scheduler.check_at(at(0, 30, 0)).await[0].1, CheckOutcome::NotDue);
        assert_eq!(builder.builds.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_next_day_fires_again() {
        let builder = Arc::new(TestBuilder::default());
        let h = harness(vec![("orders", midnight(), builder.clone())]);

        h.scheduler.check_at(at(0, 0, 1)).await;
        let next_day = Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 1).unwrap();
        let outcome = h.scheduler.check_at(next_day).await;

        assert_eq!(outcome[0].1, CheckOutcome::Sent);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reports_use_independent_claims() {
        let orders = Arc::new(TestBuilder::default());
        let views = Arc::new(TestBuilder::default());
        let h = harness(vec![
            ("orders", midnight(), orders.clone()),
            ("views", NaiveTime::from_hms_opt(5, 0, 0).unwrap(), views.clone()),
        ]);

        let midnight_check = h.scheduler.check_at(at(0, 0, 1)).await;
        assert_eq!(midnight_check[0].1, CheckOutcome::Sent);
        assert_eq!(midnight_check[1].1, CheckOutcome::NotDue);

        let morning_check = h.scheduler.check_at(at(5, 0, 1)).await;
        assert_eq!(morning_check[0].1, CheckOutcome::NotDue);
        assert_eq!(morning_check[1].1, CheckOutcome::Sent);

        let settings = h.memory.settings.lock().unwrap();
        assert!(settings.contains_key("last_orders_report_date"));
        assert!(settings.contains_key("last_views_report_date"));
    }

    #[tokio::test]
    async fn test_overlapping_checks_are_busy() {
        let builder = Arc::new(TestBuilder {
            delay_ms: 50,
            ..Default::default()
        });
        let h = harness(vec![("orders", midnight(), builder.clone())]);

        let (a, b) = tokio::join!(
            h.scheduler.check_at(at(0, 0, 1)),
            h.scheduler.check_at(at(0, 0, 1))
        );

        let mut outcomes = vec![a[0].1, b[0].1];
        outcomes.sort_by_key(|o| *o == CheckOutcome::Sent);
        assert_eq!(outcomes, vec![CheckOutcome::Busy, CheckOutcome::Sent]);
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_send() {
        let builder = Arc::new(TestBuilder::default());
        let h = harness(vec![("orders", midnight(), builder.clone())]);
        h.memory.fail_permanent.store(1, Ordering::SeqCst);

        let outcome = h.scheduler.check_at(at(0, 0, 1)).await;

        assert_eq!(outcome[0].1, CheckOutcome::StoreUnavailable);
        assert_eq!(builder.builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_offset_shifts_report_day() {
        let builder = Arc::new(TestBuilder::default());
        let memory = Arc::new(MemoryStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let store = RetryableStore::new(memory.clone(), fast_policy(2));
        let moscow = FixedOffset::east_opt(3 * 3600).unwrap();
        let mut scheduler = ReportScheduler::new(store, notifier.clone(), moscow);
        scheduler.add_report(
            "orders",
            DailyWindow::new(midnight(), Duration::from_secs(60)),
            Box::new(builder.clone()),
        );

        // 21:00:10 UTC on May 1st is 00:00:10 on May 2nd in UTC+3
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 21, 0, 10).unwrap();
        assert_eq!(scheduler.check_at(now).await[0].1, CheckOutcome::Sent);
        assert_eq!(
            memory.settings.lock().unwrap().get("last_orders_report_date").map(String::as_str),
            Some("2024-05-02")
        );
    }

    #[tokio::test]
    async fn test_orders_count_report_uses_local_day() {
        let memory = Arc::new(MemoryStore::default());
        let store = RetryableStore::new(memory.clone(), fast_policy(2));
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let report = OrdersCountReport::new(store, offset);
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        let (start, end) = report.day_bounds(date);
        // 2024-05-01 00:00 UTC+3 == 2024-04-30 21:00 UTC
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 4, 30, 21, 0, 0).unwrap().timestamp());
        assert_eq!(end - start, 86_400);

        {
            use crate::monitor::db::OrderStore;
            memory.mark_processed("in-1", 1, "t", start).unwrap();
            memory.mark_processed("in-2", 2, "t", end - 1).unwrap();
            memory.mark_processed("out", 3, "t", end).unwrap();
        }

        let text = report.build(date).await.unwrap();
        assert!(text.contains("01.05.2024"));
        assert!(text.contains("Orders processed: 2"));
    }
}
