//! Core data types shared by the monitor components

use chrono::NaiveDate;

/// A pending marketplace order as delivered by the order source.
///
/// Only `uid` and `created_at` matter to the monitor; everything else is
/// carried through to the notification text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Order {
    /// Unique order identifier (dedup key)
    pub uid: String,
    /// Numeric marketplace order id
    pub id: i64,
    /// Creation timestamp as supplied by the source
    pub created_at: String,
    pub article: String,
    /// Sale price in roubles
    pub sale_price: f64,
    /// List price in roubles, when supplied
    pub price: Option<f64>,
    pub delivery_type: String,
    pub address: Option<String>,
    pub seller_date: String,
    pub rid: String,
    pub nm_id: Option<i64>,
    pub chrt_id: Option<i64>,
}

/// Durable record of a delivered order (`processed_orders` row)
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedOrderRecord {
    pub order_uid: String,
    pub order_id: i64,
    pub created_at: String,
    /// Unix seconds, set when the record is written
    pub processed_at: i64,
}

/// Outcome of one ingestion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub fetched: usize,
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Settings key holding the last date a report was claimed for
pub fn report_date_key(report_name: &str) -> String {
    format!("last_{}_report_date", report_name)
}

/// ISO date string used as the value of report claim keys
pub fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
