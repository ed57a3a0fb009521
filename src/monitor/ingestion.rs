//! Order ingestion - one poll of the order source per cycle
//!
//! Each order is handled on its own:
//! 1. Skip if already recorded as processed
//! 2. Deliver through the notifier
//! 3. Record as processed only after delivery succeeded
//!
//! A failure on one order is logged and the loop moves on. The order was
//! never recorded, so the next poll offers it again.

use super::error::CycleError;
use super::format::format_order_notification;
use super::source::{Notifier, OrderSource};
use super::store::RetryableStore;
use super::types::{IngestSummary, Order};
use std::sync::Arc;

pub struct OrderIngestor {
    source: Arc<dyn OrderSource>,
    notifier: Arc<dyn Notifier>,
    store: RetryableStore,
}

enum OrderOutcome {
    Delivered,
    AlreadyProcessed,
    Failed,
}

impl OrderIngestor {
    pub fn new(source: Arc<dyn OrderSource>, notifier: Arc<dyn Notifier>, store: RetryableStore) -> Self {
        Self {
            source,
            notifier,
            store,
        }
    }

    /// Poll once. Only a failing order source fails the whole pass.
    pub async fn run(&self) -> Result<IngestSummary, CycleError> {
        log::info!("🔍 Checking for new orders...");
        let orders = self.source.fetch_new_orders().await?;

        let mut summary = IngestSummary {
            fetched: orders.len(),
            ..Default::default()
        };

        for order in &orders {
            match self.process_order(order).await {
                OrderOutcome::Delivered => summary.delivered += 1,
                OrderOutcome::AlreadyProcessed => summary.skipped += 1,
                OrderOutcome::Failed => summary.failed += 1,
            }
        }

        if summary.delivered > 0 || summary.failed > 0 {
            log::info!(
                "📊 Orders: {} fetched | {} delivered | {} already processed | {} failed",
                summary.fetched,
                summary.delivered,
                summary.skipped,
                summary.failed
            );
        } else {
            log::info!("No new orders ({} already processed)", summary.skipped);
        }

        Ok(summary)
    }

    async fn process_order(&self, order: &Order) -> OrderOutcome {
        match self.store.has_processed(&order.uid).await {
            Ok(true) => {
                log::debug!("Order {} already processed", order.uid);
                return OrderOutcome::AlreadyProcessed;
            }
            Ok(false) => {}
            Err(e) => {
                // Unknown state: do not risk a duplicate, try again next poll
                log::error!("❌ Could not check order {}: {}", order.uid, e);
                return OrderOutcome::Failed;
            }
        }

        let message = format_order_notification(order);
        if let Err(e) = self.notifier.send(&message).await {
            log::warn!("⚠️  Notification failed for order {}: {}", order.uid, e);
            return OrderOutcome::Failed;
        }

        match self
            .store
            .mark_processed(&order.uid, order.id, &order.created_at)
            .await
        {
            Ok(()) => {
                log::info!("✅ New order delivered: {}", order.uid);
                OrderOutcome::Delivered
            }
            Err(e) => {
                log::error!(
                    "❌ Order {} delivered but could not be recorded: {}",
                    order.uid,
                    e
                );
                OrderOutcome::Failed
            }
        }
    }
}
