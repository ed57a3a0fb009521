//! Telegram message bodies (HTML parse mode)

use super::types::Order;
use chrono::NaiveDate;
use std::collections::HashMap;

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn format_order_notification(order: &Order) -> String {
    let address = order
        .address
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .unwrap_or("Address not specified");

    let mut lines = vec![
        "🆕 <b>New FBS order</b>".to_string(),
        String::new(),
        format!("📦 <b>Article:</b> {}", escape_html(&order.article)),
        format!("🆔 <b>Order ID:</b> {}", order.id),
        format!("🔖 <b>UID:</b> {}", escape_html(&order.uid)),
        format!("💰 <b>Sale price:</b> {:.2} ₽", order.sale_price),
        format!("📅 <b>Seller date:</b> {}", escape_html(&order.seller_date)),
        format!("📍 <b>Address:</b> {}", escape_html(address)),
        format!("🚚 <b>Delivery type:</b> {}", escape_html(&order.delivery_type.to_uppercase())),
        format!("🆔 <b>RID:</b> {}", escape_html(&order.rid)),
    ];

    if let Some(nm_id) = order.nm_id {
        lines.push(format!("🔢 <b>nmId:</b> {}", nm_id));
    }
    if let Some(chrt_id) = order.chrt_id {
        lines.push(format!("🔢 <b>chrtId:</b> {}", chrt_id));
    }
    if let Some(price) = order.price {
        lines.push(format!("💵 <b>Price:</b> {:.2} ₽", price));
    }

    lines.join("\n")
}

pub fn format_daily_statistics(orders_count: u64, date: NaiveDate) -> String {
    let tail = match orders_count {
        0 => "😔 No orders".to_string(),
        1 => "✅ 1 order processed".to_string(),
        n => format!("✅ Orders processed: {}", n),
    };

    format!(
        "📊 <b>Statistics for {}</b>\n\n📦 <b>Total orders:</b> {}\n\n{}",
        date.format("%d.%m.%Y"),
        orders_count,
        tail
    )
}

/// Views report, products sorted by views (descending) then label.
pub fn format_views_report(views: &HashMap<String, u64>, date: NaiveDate) -> String {
    let header = format!("👁 <b>Product views for {}</b>", date.format("%d.%m.%Y"));

    if views.is_empty() {
        return format!("{}\n\n😔 No views", header);
    }

    let mut rows: Vec<(&String, &u64)> = views.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let total: u64 = views.values().sum();
    let mut lines = vec![header, String::new()];
    lines.extend(
        rows.iter()
            .map(|(label, count)| format!("• {}: {}", escape_html(label), count)),
    );
    lines.push(String::new());
    lines.push(format!("📈 <b>Total views:</b> {}", total));

    lines.join("\n")
}
