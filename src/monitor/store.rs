//! Retrying facade over `OrderStore`
//!
//! Every read and write of durable state goes through `RetryableStore`.
//! Transient errors (SQLite busy/locked) are retried with exponential backoff;
//! permanent errors are returned on the first attempt.

use super::db::OrderStore;
use super::error::StoreError;
use super::retry::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;

#[derive(Clone)]
pub struct RetryableStore {
    inner: Arc<dyn OrderStore>,
    policy: RetryPolicy,
}

impl RetryableStore {
    pub fn new(inner: Arc<dyn OrderStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn call<T, F>(&self, label: &str, op: F) -> Result<T, StoreError>
    where
        F: Fn(&dyn OrderStore) -> Result<T, StoreError>,
    {
        let inner = self.inner.as_ref();
        retry_with_backoff(&self.policy, label, StoreError::is_transient, || {
            let result = op(inner);
            async move { result }
        })
        .await
    }

    pub async fn has_processed(&self, order_uid: &str) -> Result<bool, StoreError> {
        self.call("has_processed", |s| s.has_processed(order_uid)).await
    }

    /// Record a delivered order; `processed_at` is stamped here.
    pub async fn mark_processed(
        &self,
        order_uid: &str,
        order_id: i64,
        created_at: &str,
    ) -> Result<(), StoreError> {
        let processed_at = chrono::Utc::now().timestamp();
        self.call("mark_processed", |s| {
            s.mark_processed(order_uid, order_id, created_at, processed_at)
        })
        .await
    }

    pub async fn processed_count(&self) -> Result<u64, StoreError> {
        self.call("processed_count", |s| s.processed_count()).await
    }

    pub async fn count_processed_between(&self, start: i64, end: i64) -> Result<u64, StoreError> {
        self.call("count_processed_between", |s| s.count_processed_between(start, end))
            .await
    }

    pub async fn prune_processed_before(&self, cutoff: i64) -> Result<usize, StoreError> {
        self.call("prune_processed_before", |s| s.prune_processed_before(cutoff))
            .await
    }

    /// Setting value, or `default` when missing or unreadable after retries.
    pub async fn get_setting(&self, key: &str, default: &str) -> String {
        match self.call("get_setting", |s| s.get_setting(key)).await {
            Ok(Some(value)) => value,
            Ok(None) => default.to_string(),
            Err(e) => {
                log::warn!("⚠️  Could not read setting {}: {} (using default)", key, e);
                default.to_string()
            }
        }
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.call("set_setting", |s| s.set_setting(key, value)).await
    }

    /// Atomic claim: true only for the first writer of `key`.
    pub async fn set_setting_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.call("set_setting_if_absent", |s| s.set_setting_if_absent(key, value))
            .await
    }

    /// Atomic per-day claim: true unless `key` already holds `today`.
    pub async fn claim_daily(&self, key: &str, today: &str) -> Result<bool, StoreError> {
        self.call("claim_daily", |s| s.claim_daily(key, today)).await
    }

    pub async fn clear_setting(&self, key: &str) -> Result<(), StoreError> {
        self.call("clear_setting", |s| s.delete_setting(key)).await
    }
}
