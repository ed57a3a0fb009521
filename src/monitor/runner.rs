//! Monitor loop: `Starting -> Running -> Stopped`
//!
//! Drives one ingestion pass per poll interval and checks the report
//! scheduler after every pass and while sleeping. Sleep is split into short
//! ticks so a stop request is honoured within one tick.

use super::ingestion::OrderIngestor;
use super::scheduler::ReportScheduler;
use super::source::{Notifier, OrderSource};
use super::store::RetryableStore;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

/// Cloneable stop request shared with the loop
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wait for a shutdown signal such as `tokio::signal::ctrl_c()` and stop the
/// loop when it arrives. If the signal cannot be listened for, the monitor
/// keeps running.
pub async fn stop_on_signal<S>(signal: S, handle: StopHandle)
where
    S: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            log::info!("");
            log::info!("⚠️  Received CTRL+C, shutting down...");
            handle.stop();
        }
        Err(err) => log::error!("❌ Failed to listen for CTRL+C, monitor keeps running: {}", err),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Starting,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stop was requested through a `StopHandle`
    Stopped,
    /// Order source or notifier unreachable at startup
    ConnectivityFailed,
    /// `max_consecutive_failures` cycles failed in a row
    TooManyFailures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorExit {
    pub reason: StopReason,
    pub cycles: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorStats {
    pub processed_orders: u64,
    pub is_running: bool,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub tick: Duration,
    pub poll_interval: Duration,
    /// Scheduler is checked every N ticks
    pub report_check_every: u32,
    pub failure_cooldown: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            poll_interval: Duration::from_secs(180),
            report_check_every: 10,
            failure_cooldown: Duration::from_secs(30),
            max_consecutive_failures: 5,
        }
    }
}

pub struct MonitorLoop {
    source: Arc<dyn OrderSource>,
    notifier: Arc<dyn Notifier>,
    store: RetryableStore,
    ingestor: OrderIngestor,
    scheduler: ReportScheduler,
    settings: LoopSettings,
    stop: StopHandle,
    state: Mutex<MonitorState>,
}

impl MonitorLoop {
    pub fn new(
        source: Arc<dyn OrderSource>,
        notifier: Arc<dyn Notifier>,
        store: RetryableStore,
        scheduler: ReportScheduler,
        settings: LoopSettings,
    ) -> Self {
        let ingestor = OrderIngestor::new(source.clone(), notifier.clone(), store.clone());
        Self {
            source,
            notifier,
            store,
            ingestor,
            scheduler,
            settings,
            stop: StopHandle::new(),
            state: Mutex::new(MonitorState::Starting),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> MonitorState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: MonitorState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = next;
    }

    pub async fn statistics(&self) -> MonitorStats {
        let processed_orders = match self.store.processed_count().await {
            Ok(count) => count,
            Err(e) => {
                log::warn!("⚠️  Could not read processed order count: {}", e);
                0
            }
        };

        MonitorStats {
            processed_orders,
            is_running: self.state() == MonitorState::Running,
            poll_interval_secs: self.settings.poll_interval.as_secs(),
        }
    }

    fn exit(&self, reason: StopReason, cycles: u64) -> MonitorExit {
        self.set_state(MonitorState::Stopped);
        log::info!("🛑 Monitor stopped ({:?}) after {} cycles", reason, cycles);
        MonitorExit { reason, cycles }
    }

    /// Run until stopped. Returns why the loop ended.
    pub async fn start(&self) -> MonitorExit {
        self.set_state(MonitorState::Starting);
        log::info!("🚀 Starting order monitor");
        log::info!("   ├─ Poll interval: {}s", self.settings.poll_interval.as_secs());
        log::info!(
            "   ├─ Reports: {}",
            if self.scheduler.report_names().is_empty() {
                "none".to_string()
            } else {
                self.scheduler.report_names().join(", ")
            }
        );
        log::info!(
            "   └─ Escalation: stop after {} consecutive failures",
            self.settings.max_consecutive_failures
        );

        if !self.source.check_connection().await {
            log::error!("❌ Order source is not reachable");
            return self.exit(StopReason::ConnectivityFailed, 0);
        }
        if !self.notifier.check_connection().await {
            log::error!("❌ Notifier is not reachable");
            return self.exit(StopReason::ConnectivityFailed, 0);
        }

        self.set_state(MonitorState::Running);
        log::info!("✅ Connectivity checks passed, monitor running");

        let mut cycles: u64 = 0;
        let mut consecutive_failures: u32 = 0;
        let mut ticks: u64 = 0;

        while !self.stop.is_stopped() {
            cycles += 1;

            let wait = match self.ingestor.run().await {
                Ok(_) => {
                    consecutive_failures = 0;
                    self.settings.poll_interval
                }
                Err(e) => {
                    consecutive_failures += 1;
                    log::error!(
                        "❌ Cycle {} failed ({}/{}): {}",
                        cycles,
                        consecutive_failures,
                        self.settings.max_consecutive_failures,
                        e
                    );
                    if consecutive_failures >= self.settings.max_consecutive_failures {
                        log::error!(
                            "💀 {} consecutive failures, giving up",
                            consecutive_failures
                        );
                        return self.exit(StopReason::TooManyFailures, cycles);
                    }
                    self.settings.failure_cooldown
                }
            };

            // A slow poll may have spanned a report window
            self.scheduler.check().await;
            self.sleep_ticks(wait, &mut ticks).await;
        }

        self.exit(StopReason::Stopped, cycles)
    }

    /// Sleep `duration` in ticks, checking the scheduler on every
    /// `report_check_every`-th tick. Returns early on stop.
    async fn sleep_ticks(&self, duration: Duration, ticks: &mut u64) {
        let tick = self.settings.tick.max(Duration::from_millis(1));
        let count = duration.as_millis().div_ceil(tick.as_millis()).max(1);
        let check_every = self.settings.report_check_every.max(1) as u64;

        for _ in 0..count {
            if self.stop.is_stopped() {
                return;
            }
            sleep(tick).await;
            *ticks += 1;

            if *ticks % check_every == 0 {
                self.scheduler.check().await;
            }
        }
    }
}
