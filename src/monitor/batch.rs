//! Chunked, paced fetching against a rate-limited views endpoint
//!
//! Chunks are requested one after another (never in parallel) with a fixed
//! pause before every chunk after the first. A rate-limited chunk sleeps for
//! the server's hint and is retried inside the same attempt budget as the
//! store. A chunk that runs out of attempts is skipped; the caller still gets
//! everything the other chunks returned, along with how many were skipped.

use super::error::FetchError;
use super::retry::RetryPolicy;
use super::source::ViewsEndpoint;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Pause used when a 429 arrives without a retry-after hint
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(60);

/// Merged counts plus how many chunks were given up on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    pub views: HashMap<String, u64>,
    pub skipped: usize,
    pub total: usize,
}

impl FetchOutcome {
    /// At least one chunk was requested and none produced data
    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.skipped == self.total
    }
}

pub struct BatchFetcher {
    endpoint: Arc<dyn ViewsEndpoint>,
    policy: RetryPolicy,
    inter_chunk_delay: Duration,
    rate_limit_delay: Duration,
}

impl BatchFetcher {
    pub fn new(endpoint: Arc<dyn ViewsEndpoint>, policy: RetryPolicy, inter_chunk_delay: Duration) -> Self {
        Self {
            endpoint,
            policy,
            inter_chunk_delay,
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
        }
    }

    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    /// Fetch view counts for `ids` on `date` in chunks of `max_batch_size`.
    ///
    /// Counts for the same key coming from different chunks are summed.
    pub async fn fetch_views(
        &self,
        ids: &[u64],
        date: NaiveDate,
        max_batch_size: usize,
    ) -> FetchOutcome {
        let chunk_size = max_batch_size.max(1);
        let total_chunks = ids.len().div_ceil(chunk_size);
        let mut merged: HashMap<String, u64> = HashMap::new();
        let mut skipped = 0usize;

        log::info!(
            "📦 Fetching views for {} ids on {} ({} chunks of ≤{})",
            ids.len(),
            date,
            total_chunks,
            chunk_size
        );

        for (index, chunk) in ids.chunks(chunk_size).enumerate() {
            if index > 0 && !self.inter_chunk_delay.is_zero() {
                sleep(self.inter_chunk_delay).await;
            }

            match self.fetch_chunk_with_retry(index, total_chunks, chunk, date).await {
                Some(counts) => {
                    for (key, count) in counts {
                        *merged.entry(key).or_insert(0) += count;
                    }
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            log::warn!(
                "⚠️  Views fetch for {} finished with {}/{} chunks skipped",
                date,
                skipped,
                total_chunks
            );
        } else {
            log::info!("✅ Views fetch for {} complete: {} keys", date, merged.len());
        }

        FetchOutcome {
            views: merged,
            skipped,
            total: total_chunks,
        }
    }

    async fn fetch_chunk_with_retry(
        &self,
        index: usize,
        total: usize,
        chunk: &[u64],
        date: NaiveDate,
    ) -> Option<HashMap<String, u64>> {
        let mut attempt = 1;
        loop {
            let delay = match self.endpoint.fetch_chunk(chunk, date).await {
                Ok(counts) => return Some(counts),
                Err(FetchError::RateLimited { retry_after }) => {
                    retry_after.unwrap_or(self.rate_limit_delay)
                }
                Err(FetchError::Transient(msg)) => {
                    log::warn!("⚠️  Chunk {}/{} transient error: {}", index + 1, total, msg);
                    self.policy.delay_after(attempt)
                }
                Err(e @ FetchError::Permanent(_)) => {
                    log::error!(
                        "❌ Chunk {}/{} ({} ids) failed, skipping: {}",
                        index + 1,
                        total,
                        chunk.len(),
                        e
                    );
                    return None;
                }
            };

            if attempt >= self.policy.max_attempts {
                log::error!(
                    "❌ Chunk {}/{} ({} ids) exhausted {} attempts, skipping",
                    index + 1,
                    total,
                    chunk.len(),
                    self.policy.max_attempts
                );
                return None;
            }

            log::warn!(
                "⏳ Chunk {}/{} attempt {}/{} failed, retrying in {}ms",
                index + 1,
                total,
                attempt,
                self.policy.max_attempts,
                delay.as_millis()
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}
