//! Telegram Bot API notifier
//!
//! Sends HTML messages with `sendMessage`; `getMe` serves as the
//! connectivity check. The target chat id is resolved once at startup from
//! the persisted `telegram_chat_id` setting, falling back to configuration.

use super::error::DeliveryError;
use super::source::Notifier;
use super::store::RetryableStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

pub const CHAT_ID_SETTING: &str = "telegram_chat_id";
const TELEGRAM_API: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    chat_id: Option<String>,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: Option<String>) -> Result<Self, DeliveryError> {
        Self::with_api_url(TELEGRAM_API, bot_token, chat_id)
    }

    pub fn with_api_url(
        api_url: &str,
        bot_token: &str,
        chat_id: Option<String>,
    ) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), bot_token),
            chat_id,
        })
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<(), DeliveryError> {
        let chat_id = self.chat_id.as_deref().ok_or(DeliveryError::NoTarget)?;

        let payload = json!({
            "chat_id": chat_id,
            "text": message,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Http(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        log::debug!("📨 Message delivered to chat {}", chat_id);
        Ok(())
    }

    async fn check_connection(&self) -> bool {
        if self.chat_id.is_none() {
            log::error!("❌ Telegram chat id is not set (TELEGRAM_CHAT_ID)");
            return false;
        }

        match self.client.get(format!("{}/getMe", self.base_url)).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                log::error!("❌ Telegram getMe returned {}", response.status());
                false
            }
            Err(e) => {
                // Strip the URL: it embeds the bot token
                log::error!("❌ Telegram connection check failed: {}", e.without_url());
                false
            }
        }
    }
}

/// Pick the chat id to notify: the persisted setting wins; otherwise the
/// configured value is persisted (first writer wins) and used.
pub async fn resolve_chat_id(store: &RetryableStore, configured: Option<&str>) -> Option<String> {
    let saved = store.get_setting(CHAT_ID_SETTING, "").await;
    if !saved.is_empty() {
        log::info!("💬 Using saved chat id: {}", saved);
        return Some(saved);
    }

    let configured = configured.map(str::trim).filter(|c| !c.is_empty())?;
    match store.set_setting_if_absent(CHAT_ID_SETTING, configured).await {
        Ok(true) => log::info!("💬 Using configured chat id: {} (saved)", configured),
        Ok(false) => log::info!("💬 Using configured chat id: {}", configured),
        Err(e) => log::warn!("⚠️  Could not persist chat id: {}", e),
    }
    Some(configured.to_string())
}
