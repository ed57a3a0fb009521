//! Wildberries API clients
//!
//! - Marketplace API: new FBS orders (`OrderSource`)
//! - Content API: product cards list, cursor-paginated (`ProductCatalog`)
//! - Analytics API: sales-funnel history, per-product `openCount` (`ViewsEndpoint`)
//!
//! ## API Reference
//!
//! Orders: `GET https://marketplace-api.wildberries.ru/api/v3/orders/new`
//! Cards: `POST https://content-api.wildberries.ru/content/v2/get/cards/list`
//! Views: `POST https://seller-analytics-api.wildberries.ru/api/analytics/v3/sales-funnel/grouped/history`

use super::error::{FetchError, SourceError};
use super::source::{OrderSource, ProductCatalog, ViewsEndpoint};
use super::types::Order;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

pub const DEFAULT_ORDERS_URL: &str = "https://marketplace-api.wildberries.ru/api/v3/orders/new";
pub const DEFAULT_CARDS_URL: &str = "https://content-api.wildberries.ru/content/v2/get/cards/list";
pub const DEFAULT_VIEWS_URL: &str =
    "https://seller-analytics-api.wildberries.ru/api/analytics/v3/sales-funnel/grouped/history";

const CARDS_PAGE_LIMIT: u64 = 100;
/// Label used when a product row carries neither vendor code nor nmId
pub const AGGREGATE_VIEWS_LABEL: &str = "total";

/// The key itself never appears in the returned error.
fn build_client(api_key: &str, timeout: Duration) -> Result<Client, SourceError> {
    let mut headers = header::HeaderMap::new();
    let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|_| SourceError::Config("API key is not a valid header value".to_string()))?;
    auth.set_sensitive(true);
    headers.insert(header::AUTHORIZATION, auth);

    Ok(Client::builder().timeout(timeout).default_headers(headers).build()?)
}

async fn error_status(response: reqwest::Response) -> SourceError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    SourceError::Status { status, body }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct OrdersResponse {
    #[serde(default)]
    orders: Vec<WbOrder>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WbOrder {
    #[serde(default)]
    order_uid: String,
    #[serde(default)]
    id: i64,
    #[serde(default)]
    article: String,
    #[serde(default)]
    created_at: String,
    /// Kopecks
    #[serde(default)]
    sale_price: Option<i64>,
    /// Kopecks
    #[serde(default)]
    price: Option<i64>,
    #[serde(default)]
    delivery_type: String,
    #[serde(default)]
    address: Option<WbAddress>,
    #[serde(default)]
    seller_date: String,
    #[serde(default)]
    rid: String,
    #[serde(default)]
    nm_id: Option<i64>,
    #[serde(default)]
    chrt_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WbAddress {
    #[serde(default)]
    full_address: Option<String>,
}

fn kopecks_to_roubles(value: i64) -> f64 {
    value as f64 / 100.0
}

impl From<WbOrder> for Order {
    fn from(raw: WbOrder) -> Self {
        Order {
            uid: raw.order_uid,
            id: raw.id,
            created_at: raw.created_at,
            article: raw.article,
            sale_price: raw.sale_price.map(kopecks_to_roubles).unwrap_or(0.0),
            price: raw.price.filter(|p| *p != 0).map(kopecks_to_roubles),
            delivery_type: raw.delivery_type,
            address: raw.address.and_then(|a| a.full_address),
            seller_date: raw.seller_date,
            rid: raw.rid,
            nm_id: raw.nm_id,
            chrt_id: raw.chrt_id,
        }
    }
}

/// Parse an orders payload, keeping only FBS orders.
pub fn parse_fbs_orders(body: &str) -> Result<Vec<Order>, SourceError> {
    let response: OrdersResponse =
        serde_json::from_str(body).map_err(|e| SourceError::Decode(e.to_string()))?;

    Ok(response
        .orders
        .into_iter()
        .filter(|o| o.delivery_type.eq_ignore_ascii_case("fbs"))
        .map(Order::from)
        .collect())
}

pub struct WbOrderClient {
    client: Client,
    url: String,
}

impl WbOrderClient {
    pub fn new(api_key: &str, url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(api_key, Duration::from_secs(30))?,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl OrderSource for WbOrderClient {
    async fn fetch_new_orders(&self) -> Result<Vec<Order>, SourceError> {
        log::debug!("📥 Requesting new orders: {}", self.url);
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(error_status(response).await);
        }

        let body = response.text().await?;
        let orders = parse_fbs_orders(&body)?;
        log::info!("📥 Received {} new FBS orders", orders.len());
        Ok(orders)
    }
}

// ---------------------------------------------------------------------------
// Product cards
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardsCursor {
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
    #[serde(rename = "nmID", skip_serializing_if = "Option::is_none")]
    nm_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct CardsResponse {
    #[serde(default)]
    cards: Vec<Card>,
    #[serde(default)]
    cursor: CardsCursor,
}

#[derive(Debug, Clone, Deserialize)]
struct Card {
    #[serde(rename = "nmID")]
    nm_id: u64,
}

pub struct WbContentClient {
    client: Client,
    url: String,
}

impl WbContentClient {
    pub fn new(api_key: &str) -> Result<Self, SourceError> {
        Self::with_url(api_key, DEFAULT_CARDS_URL)
    }

    pub fn with_url(api_key: &str, url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(api_key, Duration::from_secs(30))?,
            url: url.to_string(),
        })
    }

    async fn fetch_page(&self, cursor: &CardsCursor) -> Result<CardsResponse, SourceError> {
        let payload = json!({
            "settings": {
                "cursor": cursor,
                "filter": { "withPhoto": -1 }
            }
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(error_status(response).await);
        }

        response
            .json::<CardsResponse>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ProductCatalog for WbContentClient {
    async fn list_product_ids(&self) -> Result<Vec<u64>, SourceError> {
        let mut ids = BTreeSet::new();
        let mut cursor = CardsCursor {
            limit: Some(CARDS_PAGE_LIMIT),
            ..Default::default()
        };

        loop {
            let page = self.fetch_page(&cursor).await?;
            ids.extend(page.cards.iter().map(|c| c.nm_id));

            let total = page.cursor.total.unwrap_or(0);
            if total < CARDS_PAGE_LIMIT || page.cursor.nm_id.is_none() {
                break;
            }

            cursor = CardsCursor {
                updated_at: page.cursor.updated_at,
                nm_id: page.cursor.nm_id,
                total: None,
                limit: Some(CARDS_PAGE_LIMIT),
            };
        }

        log::info!("🗂️  Catalog contains {} products", ids.len());
        Ok(ids.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Views (sales funnel)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct FunnelResponse {
    #[serde(default)]
    data: Vec<FunnelProduct>,
}

#[derive(Debug, Clone, Deserialize)]
struct FunnelProduct {
    #[serde(default)]
    product: FunnelProductInfo,
    #[serde(default)]
    history: Vec<FunnelDay>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunnelProductInfo {
    #[serde(default)]
    vendor_code: String,
    #[serde(default)]
    nm_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunnelDay {
    #[serde(default)]
    date: String,
    #[serde(default)]
    open_count: u64,
}

/// Extract `label -> openCount` for `date` from a sales-funnel payload.
///
/// Products are labelled by vendor code, falling back to `nmId_<id>` and
/// then `AGGREGATE_VIEWS_LABEL`. Zero counts are dropped and duplicate
/// labels are summed.
pub fn parse_views(body: &str, date: NaiveDate) -> Result<HashMap<String, u64>, FetchError> {
    let response: FunnelResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Permanent(e.to_string()))?;
    let wanted = date.format("%Y-%m-%d").to_string();
    let mut views = HashMap::new();

    for item in response.data {
        let Some(day) = item.history.iter().find(|d| d.date == wanted) else {
            continue;
        };
        if day.open_count == 0 {
            continue;
        }

        let vendor_code = item.product.vendor_code.trim();
        let label = if !vendor_code.is_empty() {
            vendor_code.to_string()
        } else {
            match item.product.nm_id {
                Some(nm_id) if nm_id > 0 => format!("nmId_{}", nm_id),
                _ => AGGREGATE_VIEWS_LABEL.to_string(),
            }
        };

        *views.entry(label).or_insert(0) += day.open_count;
    }

    Ok(views)
}

pub struct WbAnalyticsClient {
    client: Client,
    url: String,
}

impl WbAnalyticsClient {
    pub fn new(api_key: &str) -> Result<Self, SourceError> {
        Self::with_url(api_key, DEFAULT_VIEWS_URL)
    }

    pub fn with_url(api_key: &str, url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(api_key, Duration::from_secs(30))?,
            url: url.to_string(),
        })
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl ViewsEndpoint for WbAnalyticsClient {
    async fn fetch_chunk(
        &self,
        ids: &[u64],
        date: NaiveDate,
    ) -> Result<HashMap<String, u64>, FetchError> {
        let day = date.format("%Y-%m-%d").to_string();
        let payload = json!({
            "selectedPeriod": { "start": day, "end": day },
            "nmIds": ids,
            "skipDeletedNm": false,
            "aggregationLevel": "day",
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                retry_after: retry_after(&response),
            });
        }
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            return Err(FetchError::Transient(format!("analytics API returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Permanent(format!(
                "analytics API returned {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        parse_views(&body, date)
    }
}
