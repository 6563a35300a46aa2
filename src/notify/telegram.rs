//! Telegram Bot API channel
//!
//! Outbound: `sendMessage` with HTML parse mode to the configured chat.
//! Inbound: `getUpdates` long polling, answering commands via `Notifier`.
//!
//! Created: 2026-10-05

use super::{Notifier, NotifyChannel};
use crate::config::TelegramConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const TELEGRAM_API_BASE_URL: &str = "https://api.telegram.org";

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
/// Server-side hold time for getUpdates
const LONG_POLL_SECS: u64 = 30;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

pub struct TelegramChannel {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build Telegram HTTP client")?;
        info!(chat_id = %config.chat_id, "Telegram bot enabled");
        Ok(Self {
            client,
            base_url: TELEGRAM_API_BASE_URL.to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }

    /// `sendMessage` to an arbitrary chat
    pub async fn send_to(&self, chat_id: &str, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .context("sendMessage request failed")?;

        let status = response.status();
        let parsed: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .with_context(|| format!("sendMessage returned unreadable body (HTTP {})", status))?;
        if !status.is_success() || !parsed.ok {
            return Err(anyhow!(
                "sendMessage rejected (HTTP {}): {}",
                status,
                parsed.description.unwrap_or_default()
            ));
        }
        Ok(())
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let response = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(Duration::from_secs(LONG_POLL_SECS) + HTTP_TIMEOUT)
            .json(&json!({
                "offset": offset,
                "timeout": LONG_POLL_SECS,
                "allowed_updates": ["message"],
            }))
            .send()
            .await
            .context("getUpdates request failed")?;

        let parsed: ApiResponse<Vec<Update>> =
            response.json().await.context("getUpdates returned unreadable body")?;
        if !parsed.ok {
            return Err(anyhow!(
                "getUpdates rejected: {}",
                parsed.description.unwrap_or_default()
            ));
        }
        Ok(parsed.result.unwrap_or_default())
    }

    /// Command loop; returns once `shutdown` flips to true or its sender is dropped.
    pub async fn listen_commands(&self, notifier: Arc<Notifier>, mut shutdown: watch::Receiver<bool>) {
        info!("Command listener started");
        let mut offset = 0i64;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let updates = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                updates = self.get_updates(offset) => updates,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("Command poll failed: {:#}", e);
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                let Some(text) = message.text.as_deref() else {
                    continue;
                };
                let Some(reply) = notifier.command_reply(text).await else {
                    continue;
                };
                debug!(chat = message.chat.id, command = text, "Answering command");
                if let Err(e) = self.send_to(&message.chat.id.to_string(), &reply).await {
                    warn!("Command reply failed: {:#}", e);
                }
            }
        }
        info!("Command listener exiting");
    }
}

#[async_trait]
impl NotifyChannel for TelegramChannel {
    async fn send(&self, text: &str) -> Result<()> {
        self.send_to(&self.chat_id, text).await
    }
}
