//! Collaborator traits consumed by the monitor core
//!
//! Concrete HTTP implementations live in `wb` (marketplace) and `notifier`
//! (Telegram). Tests substitute in-memory fakes.

use super::error::{DeliveryError, FetchError, SourceError};
use super::types::Order;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Yields the orders currently pending on the marketplace.
///
/// Filtering by delivery type happens here, not in the core.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_new_orders(&self) -> Result<Vec<Order>, SourceError>;

    async fn check_connection(&self) -> bool {
        match self.fetch_new_orders().await {
            Ok(_) => true,
            Err(e) => {
                log::error!("❌ Order source check failed: {}", e);
                false
            }
        }
    }
}

/// Delivery channel for formatted (HTML) text.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), DeliveryError>;

    async fn check_connection(&self) -> bool;
}

/// Rate-limited endpoint returning per-product view counts for one date.
///
/// Accepts at most the endpoint's per-request cap of ids; `BatchFetcher`
/// takes care of chunking.
#[async_trait]
pub trait ViewsEndpoint: Send + Sync {
    async fn fetch_chunk(
        &self,
        ids: &[u64],
        date: NaiveDate,
    ) -> Result<HashMap<String, u64>, FetchError>;
}

/// Lists the seller's product ids (marketplace nmIDs).
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn list_product_ids(&self) -> Result<Vec<u64>, SourceError>;
}
