//! Notification Dispatcher
//!
//! Formats harvest events as HTML chat messages and hands them to a
//! `NotifyChannel`. Delivery is best effort: failures are logged and never
//! reach the caller. Without a channel every notification is a no-op.
//!
//! Also answers the chat commands (`/start`, `/help`, `/status`) from the
//! registry of harvester statuses.
//!
//! Created: 2026-10-05

pub mod telegram;

pub use telegram::TelegramChannel;

use crate::harvest::HarvestStatus;
use crate::types::{HarvestReport, LastOutcome};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const BOT_NAME: &str = "Harvest Bot";

/// Outbound message sink
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Deliver one HTML-formatted message to the configured chat.
    async fn send(&self, text: &str) -> Result<()>;
}

struct CommandListener {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Notifier {
    channel: Option<Arc<dyn NotifyChannel>>,
    explorer_url: Option<String>,
    instances: DashMap<String, Arc<HarvestStatus>>,
    started_at: DateTime<Utc>,
    listener: Mutex<Option<CommandListener>>,
}

impl Notifier {
    pub fn new(channel: Option<Arc<dyn NotifyChannel>>, explorer_url: Option<String>) -> Self {
        if channel.is_some() {
            info!("Notifications enabled");
        } else {
            info!("Notifications disabled (missing config)");
        }
        Self {
            channel,
            explorer_url,
            instances: DashMap::new(),
            started_at: Utc::now(),
            listener: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }

    pub fn register_instance(&self, status: Arc<HarvestStatus>) {
        debug!("Registered bot: {}", status.id());
        self.instances.insert(status.id().to_string(), status);
    }

    /// Registered ids, sorted for stable output
    pub fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Answer chat commands until `stop_command_listener` or shutdown.
    pub async fn spawn_command_listener(self: &Arc<Self>, channel: Arc<TelegramChannel>) {
        let (tx, rx) = watch::channel(false);
        let notifier = Arc::clone(self);
        let handle = tokio::spawn(async move {
            channel.listen_commands(notifier, rx).await;
        });
        *self.listener.lock().await = Some(CommandListener {
            shutdown: tx,
            handle,
        });
    }

    pub async fn stop_command_listener(&self) {
        let Some(listener) = self.listener.lock().await.take() else {
            return;
        };
        info!("Stopping command listener");
        let _ = listener.shutdown.send(true);
        if let Err(e) = listener.handle.await {
            error!("Command listener ended abnormally: {}", e);
        } else {
            info!("Command listener stopped");
        }
    }

    pub async fn notify_startup(&self) {
        let ids = self.instance_ids();
        let message = format!(
            "🚀 <b>{} Started</b>\n\nActive bots: {}\nInstances:\n{}\n",
            BOT_NAME,
            ids.len(),
            bullet_list(&ids)
        );
        self.deliver(&message).await;
    }

    /// `reason` is set when shutting down because of an error.
    pub async fn notify_shutdown(&self, reason: Option<&str>) {
        self.stop_command_listener().await;

        let ids = self.instance_ids();
        let (emoji, title) = match reason {
            Some(_) => ("❌", "Shutdown (Error)"),
            None => ("🛑", "Shutdown"),
        };
        let mut message = format!(
            "{} <b>{} {}</b>\n\nStopped bots: {}\nInstances:\n{}\n",
            emoji,
            BOT_NAME,
            title,
            ids.len(),
            bullet_list(&ids)
        );
        if let Some(reason) = reason {
            let _ = write!(message, "\nReason: {}\n", escape_html(reason));
        }
        self.deliver(&message).await;
    }

    pub async fn notify_harvest_outcome(
        &self,
        id: &str,
        report: &HarvestReport,
        next_harvest_time: Option<DateTime<Utc>>,
    ) {
        let mut message = format!(
            "<b>Harvest Update</b>\nBot: <code>{}</code>\n",
            escape_html(id)
        );

        match report {
            HarvestReport::Success { hash } => {
                message.push_str("Status: ✅ Success\n");
                match &self.explorer_url {
                    Some(explorer) => {
                        let _ = writeln!(message, "<a href=\"{}/tx/{}\">{}</a>", explorer, hash, hash);
                    }
                    None => {
                        let _ = writeln!(message, "Transaction: <code>{}</code>", hash);
                    }
                }
            }
            HarvestReport::Failure { error } => {
                message.push_str("Status: ❌ Failed\n");
                let _ = writeln!(message, "Error: <pre>{}</pre>", escape_html(error));
            }
        }

        if let Some(next) = next_harvest_time {
            let _ = write!(message, "\nNext harvest: {}", humanize_relative(next, Utc::now()));
        }

        self.deliver(&message).await;
    }

    /// Harvest conditions have not been met for over a day.
    pub async fn notify_stale_conditions(&self, id: &str, last_success: Option<DateTime<Utc>>) {
        let now = Utc::now();
        let mut message = format!(
            "⚠️ <b>Harvest Conditions Not Met</b>\nBot: <code>{}</code>\n\n\
             Harvest conditions have not been met for more than 24 hours.\n\n",
            escape_html(id)
        );
        match last_success {
            Some(at) => {
                let _ = write!(
                    message,
                    "Last successful harvest: {}\nTime elapsed: {}h",
                    humanize_relative(at, now),
                    (now - at).num_hours()
                );
            }
            None => message.push_str("No harvest has been executed yet."),
        }
        self.deliver(&message).await;
    }

    /// Uptime plus one block per registered harvester.
    pub async fn report_status(&self) -> String {
        let now = Utc::now();
        let mut message = String::from("📊 <b>Bot Status</b>\n\n");
        let _ = writeln!(message, "🚀 <b>Launched:</b> {}", humanize_relative(self.started_at, now));
        let _ = writeln!(message, "⏱ <b>Uptime:</b> {}", format_uptime(now - self.started_at));
        let _ = writeln!(message, "🤖 <b>Active Bots:</b> {}\n", self.instances.len());

        // Clone out of the map so no shard lock is held across the awaits below
        let mut statuses: Vec<Arc<HarvestStatus>> =
            self.instances.iter().map(|e| Arc::clone(e.value())).collect();
        statuses.sort_by(|a, b| a.id().cmp(b.id()));

        for status in statuses {
            let stats = status.stats().await;
            let harvesting = status.is_harvesting();
            let emoji = if harvesting {
                "🔄"
            } else {
                match stats.last_outcome {
                    LastOutcome::Success => "✅",
                    LastOutcome::Failure => "❌",
                    LastOutcome::NeverRun => "⏸",
                }
            };
            let last = stats
                .last_harvest_time
                .map(|t| humanize_relative(t, now))
                .unwrap_or_else(|| "Never".to_string());
            let next = stats
                .next_harvest_time
                .map(|t| humanize_relative(t, now))
                .unwrap_or_else(|| "Unknown".to_string());

            let _ = writeln!(message, "{} <b>{}</b>", emoji, escape_html(status.id()));
            let _ = writeln!(
                message,
                "  • Success: {} | Failed: {}",
                stats.success_count, stats.failure_count
            );
            let _ = writeln!(message, "  • Last Harvest: {}", last);
            let _ = writeln!(message, "  • Next Harvest: {}", next);
            let _ = writeln!(
                message,
                "  • Status: {}\n",
                if harvesting { "Harvesting..." } else { "Idle" }
            );
        }
        message
    }

    /// Reply for an inbound chat message; `None` for non-commands.
    pub async fn command_reply(&self, text: &str) -> Option<String> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }
        let word = text.split_whitespace().next().unwrap_or(text);
        // "/status@SomeBot" in group chats
        let command = word.split('@').next().unwrap_or(word);

        let reply = match command {
            "/start" => format!(
                "👋 <b>Welcome to {}!</b>\n\n\
                 I'm an automated harvest bot for yield vaults.\n\n\
                 Available commands:\n\
                 /status - Show bot status and statistics\n\
                 /help - Show this help message",
                BOT_NAME
            ),
            "/help" => format!(
                "📚 <b>{} Help</b>\n\n\
                 <b>Available Commands:</b>\n\
                 /status - Show bot uptime, harvest statistics, and vault information\n\
                 /help - Show this help message\n\n\
                 <b>About:</b>\n\
                 This bot monitors vaults and harvests them when profitable.",
                BOT_NAME
            ),
            "/status" => self.report_status().await,
            other => format!(
                "❓ Unknown command: {}\n\nUse /help to see available commands.",
                escape_html(other)
            ),
        };
        Some(reply)
    }

    async fn deliver(&self, text: &str) {
        let Some(channel) = &self.channel else {
            debug!("Notification skipped (missing config): {}", text);
            return;
        };
        match channel.send(text).await {
            Ok(()) => debug!("Notification sent"),
            Err(e) => error!("Notification failed: {:#}", e),
        }
    }
}

fn bullet_list(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("• {}", escape_html(id)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Minimal escaping for Telegram's HTML parse mode
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// `Hh Mm Ss`
pub fn format_uptime(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// "in 5 minutes", "2 hours ago", "a few seconds ago"
pub fn humanize_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = at - now;
    let secs = delta.num_seconds().abs();
    let future = delta.num_seconds() > 0;

    let round = |value: i64, unit: i64| (value + unit / 2) / unit;
    let phrase = if secs < 45 {
        "a few seconds".to_string()
    } else if secs < 90 {
        "a minute".to_string()
    } else if secs < 45 * 60 {
        format!("{} minutes", round(secs, 60))
    } else if secs < 90 * 60 {
        "an hour".to_string()
    } else if secs < 22 * 3600 {
        format!("{} hours", round(secs, 3600))
    } else if secs < 36 * 3600 {
        "a day".to_string()
    } else if secs < 26 * 86_400 {
        format!("{} days", round(secs, 86_400))
    } else if secs < 45 * 86_400 {
        "a month".to_string()
    } else if secs < 320 * 86_400 {
        format!("{} months", round(secs, 30 * 86_400))
    } else if secs < 548 * 86_400 {
        "a year".to_string()
    } else {
        format!("{} years", round(secs, 365 * 86_400))
    };

    if future {
        format!("in {}", phrase)
    } else {
        format!("{} ago", phrase)
    }
}
