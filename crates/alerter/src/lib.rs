use crate::error::AlerterError;
use configuration::TelegramConfig;
use events::{Notification, NotificationKind};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;
use uuid::Uuid;
pub mod error;

/// The JSON payload for the Telegram `sendMessage` endpoint.
#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// A client for sending notifications to the Telegram Bot API.
///
/// Each account's notifications go to that account's chat. Critical
/// notifications are copied to the operator chat as well.
pub struct TelegramAlerter {
    client: Client,
    token: String,
    operator_chat_id: Option<String>,
    account_chats: HashMap<Uuid, String>,
}

impl TelegramAlerter {
    /// Returns `None` if no bot token is configured, allowing the system to
    /// run with alerting disabled.
    pub fn new(config: &TelegramConfig, account_chats: HashMap<Uuid, String>) -> Option<Self> {
        let token = config.bot_token.as_deref().filter(|t| !t.is_empty())?;
        if config.operator_chat_id.is_none() && account_chats.is_empty() {
            tracing::warn!("Telegram alerter has a token but no chats to deliver to.");
        }
        Some(Self {
            client: Client::new(),
            token: token.to_string(),
            operator_chat_id: config.operator_chat_id.clone(),
            account_chats,
        })
    }

    /// Chats a notification should be delivered to.
    fn recipients(&self, notification: &Notification) -> Vec<&str> {
        let mut chats = Vec::new();
        if let Some(chat) = self.account_chats.get(&notification.account_id) {
            chats.push(chat.as_str());
        }
        if notification.is_critical() {
            if let Some(operator) = self.operator_chat_id.as_deref() {
                if !chats.contains(&operator) {
                    chats.push(operator);
                }
            }
        }
        chats
    }

    /// Sends a MarkdownV2 text message to one chat.
    pub async fn send_message(&self, chat_id: &str, message: &str) -> Result<(), AlerterError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);

        let payload = SendMessagePayload { chat_id, text: message, parse_mode: "MarkdownV2" };

        let response = self.client.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to decode error response".to_string());
            return Err(AlerterError::ApiError(error_text));
        }

        Ok(())
    }

    pub async fn deliver(&self, notification: &Notification) {
        let text = format_notification(notification);
        for chat in self.recipients(notification) {
            if let Err(e) = self.send_message(chat, &text).await {
                tracing::error!(error = %e, chat, "Failed to send Telegram alert.");
            }
        }
    }
}

/// A long-running service that forwards every notification on the broadcast
/// channel to Telegram.
pub async fn run_alerter_service(
    alerter: TelegramAlerter,
    mut event_rx: broadcast::Receiver<Notification>,
) {
    tracing::info!("Alerter service started. Listening for notifications.");

    if let Some(operator) = alerter.operator_chat_id.as_deref() {
        let _ = alerter.send_message(operator, "✅ *Autotrader Engine Started*").await;
    }

    loop {
        match event_rx.recv().await {
            Ok(notification) => alerter.deliver(&notification).await,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Alerter service lagged, skipped {} notifications.", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("Notification channel closed. Alerter service shutting down.");
                break;
            }
        }
    }
}

/// Renders a notification as a Telegram MarkdownV2 message.
pub fn format_notification(notification: &Notification) -> String {
    match &notification.kind {
        NotificationKind::Opened { symbol, entry_price } => format!(
            "📈 *Position opened* {}\nEntry `{}`",
            escape_markdown(symbol),
            entry_price
        ),
        NotificationKind::Closed { symbol, status, net_profit_loss } => {
            let icon = if net_profit_loss.is_sign_negative() { "🔴" } else { "🟢" };
            format!(
                "{} *Position closed* {}\n{}\nNet P/L `{}`",
                icon,
                escape_markdown(symbol),
                escape_markdown(status.as_str()),
                net_profit_loss.round_dp(4)
            )
        }
        NotificationKind::Critical { symbol, message } => format!(
            "🚨 *CRITICAL* {}\n{}",
            escape_markdown(symbol),
            escape_markdown(message)
        ),
    }
}

/// A helper function to escape characters that have special meaning in Telegram's MarkdownV2.
fn escape_markdown(text: &str) -> String {
    let special_chars = r"_*[]()~`>#+-=|{}.!";
    text.chars().fold(String::with_capacity(text.len()), |mut out, c| {
        if special_chars.contains(c) {
            out.push('\\');
        }
        out.push(c);
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::TradeStatus;
    use rust_decimal_macros::dec;

    fn alerter(account: Uuid) -> TelegramAlerter {
        let config = TelegramConfig {
            bot_token: Some("token".into()),
            operator_chat_id: Some("ops".into()),
        };
        TelegramAlerter::new(&config, HashMap::from([(account, "chat-1".to_string())])).unwrap()
    }

    #[test]
    fn disabled_without_token() {
        assert!(TelegramAlerter::new(&TelegramConfig::default(), HashMap::new()).is_none());
    }

    #[test]
    fn critical_goes_to_account_and_operator() {
        let account = Uuid::new_v4();
        let a = alerter(account);
        let opened = Notification::opened(account, "SOLUSDT", dec!(100));
        assert_eq!(a.recipients(&opened), vec!["chat-1"]);
        let critical = Notification::critical(account, "SOLUSDT", "unprotected");
        assert_eq!(a.recipients(&critical), vec!["chat-1", "ops"]);
        let stranger = Notification::critical(Uuid::new_v4(), "SOLUSDT", "unprotected");
        assert_eq!(a.recipients(&stranger), vec!["ops"]);
    }

    #[test]
    fn formats_and_escapes() {
        let n = Notification::closed(Uuid::nil(), "SOLUSDT", TradeStatus::ClosedTakeProfit, dec!(18));
        let text = format_notification(&n);
        assert!(text.contains("CLOSED\\_TAKE\\_PROFIT"));
        assert!(text.starts_with("🟢"));
        assert_eq!(escape_markdown("1.5-2"), "1\\.5\\-2");
    }
}
