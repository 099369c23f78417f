//! Telegram channel adapter.
//!
//! Long-polls `getUpdates` with an advancing offset and replies via
//! `sendMessage` with Markdown parse mode. Messages are capped at 4096
//! characters. Poll failures back off exponentially, capped at 5 minutes.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use relayclaw_core::channel::{truncate_reply, Channel, InboundMessage};
use relayclaw_core::error::ChannelError;

const MESSAGE_CAP: usize = 4096;
const POLL_TIMEOUT_S: u64 = 30;
const BACKOFF_CAP: Duration = Duration::from_secs(300);

pub struct TelegramChannel {
    token: String,
    allowed_users: Vec<i64>,
    client: reqwest::Client,
    shutdown: watch::Sender<bool>,
}

impl TelegramChannel {
    pub fn new(token: String, allowed_users: Vec<i64>) -> Self {
        let client = reqwest::Client::builder()
            // Longer than the long-poll window so the server side closes
            // the request, not us.
            .timeout(Duration::from_secs(POLL_TIMEOUT_S + 10))
            .build()
            .expect("reqwest client");
        let (shutdown, _) = watch::channel(false);
        Self {
            token,
            allowed_users,
            client,
            shutdown,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.token)
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ChannelError> {
        let url = format!(
            "{}?offset={offset}&limit=100&timeout={POLL_TIMEOUT_S}",
            self.api_url("getUpdates")
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;

        let body: ApiResult<Vec<Update>> = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;

        if !body.ok {
            return Err(ChannelError::ConnectionLost(
                body.description.unwrap_or_else(|| "getUpdates failed".into()),
            ));
        }
        Ok(body.result.unwrap_or_default())
    }

    async fn poll_loop(self: std::sync::Arc<Self>, tx: mpsc::Sender<InboundMessage>) {
        let mut offset: i64 = 0;
        let mut backoff = Duration::from_secs(1);
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                return;
            }

            let updates = tokio::select! {
                updates = self.get_updates(offset) => updates,
                _ = shutdown.changed() => return,
            };

            let updates = match updates {
                Ok(u) => {
                    backoff = Duration::from_secs(1);
                    u
                }
                Err(e) => {
                    warn!(error = %e, backoff_s = backoff.as_secs(), "telegram poll failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                    continue;
                }
            };

            for update in updates {
                if update.update_id >= offset {
                    offset = update.update_id + 1;
                }

                let Some(message) = update.message else { continue };
                let (Some(from), Some(chat), text) = (message.from, message.chat, message.text)
                else {
                    continue;
                };
                if text.is_empty() {
                    continue;
                }

                let sender_id = from.id.to_string();
                if !self.is_allowed(&sender_id) {
                    warn!(user_id = from.id, "unauthorized telegram sender");
                    let _ = self
                        .send(&chat.id.to_string(), "⛔ unauthorized user")
                        .await;
                    continue;
                }

                let sender_name = if from.username.is_empty() {
                    from.first_name
                } else {
                    from.username
                };

                let inbound = InboundMessage {
                    channel: "telegram".into(),
                    sender_id,
                    sender_name,
                    content: text,
                    chat_id: chat.id.to_string(),
                };

                if tx.send(inbound).await.is_err() {
                    return; // consumer gone
                }
            }
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn max_message_len(&self) -> usize {
        MESSAGE_CAP
    }

    async fn start(&self) -> Result<mpsc::Receiver<InboundMessage>, ChannelError> {
        // Verify the token before settling into the poll loop.
        let me: ApiResult<serde_json::Value> = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;
        if !me.ok {
            return Err(ChannelError::NotConfigured(
                "telegram token rejected by getMe".into(),
            ));
        }
        let username = me
            .result
            .as_ref()
            .and_then(|v| v["username"].as_str())
            .unwrap_or_default()
            .to_string();
        info!(username, "telegram bot connected");

        let (tx, rx) = mpsc::channel(64);
        let this = std::sync::Arc::new(Self {
            token: self.token.clone(),
            allowed_users: self.allowed_users.clone(),
            client: self.client.clone(),
            shutdown: self.shutdown.clone(),
        });
        tokio::spawn(this.poll_loop(tx));
        Ok(rx)
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": truncate_reply(text, MESSAGE_CAP),
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: "telegram".into(),
                reason: e.to_string(),
            })?;

        let result: ApiResult<serde_json::Value> =
            response.json().await.map_err(|e| ChannelError::DeliveryFailed {
                channel: "telegram".into(),
                reason: e.to_string(),
            })?;
        if !result.ok {
            return Err(ChannelError::DeliveryFailed {
                channel: "telegram".into(),
                reason: result.description.unwrap_or_else(|| "sendMessage failed".into()),
            });
        }
        Ok(())
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        if self.allowed_users.is_empty() {
            return false;
        }
        sender_id
            .parse::<i64>()
            .map(|id| self.allowed_users.contains(&id))
            .unwrap_or(false)
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("telegram channel stopping");
        let _ = self.shutdown.send(true);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        if self.token.is_empty() {
            return Ok(false);
        }
        Ok(self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false))
    }
}

#[derive(Debug, Deserialize)]
struct ApiResult<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    #[serde(default)]
    from: Option<TgUser>,
    #[serde(default)]
    chat: Option<TgChat>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    username: String,
    #[serde(default)]
    first_name: String,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}
