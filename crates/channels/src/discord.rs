//! Discord channel adapter.
//!
//! Inbound messages arrive as application-command interactions delivered
//! to the webhook endpoint (interaction type 2); the gateway's HTTP
//! server feeds raw bodies into `handle_webhook`. Replies go out via
//! `POST /channels/{id}/messages`, capped at 2000 characters.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use relayclaw_core::channel::{truncate_reply, Channel, InboundMessage};
use relayclaw_core::error::ChannelError;

const MESSAGE_CAP: usize = 2000;
const API_URL: &str = "https://discord.com/api/v10";

/// Interaction types we understand.
const INTERACTION_PING: u64 = 1;
const INTERACTION_APPLICATION_COMMAND: u64 = 2;

pub struct DiscordChannel {
    token: String,
    allowed_guilds: Vec<String>,
    client: reqwest::Client,
    inbound_tx: Mutex<Option<mpsc::Sender<InboundMessage>>>,
}

impl DiscordChannel {
    pub fn new(token: String, allowed_guilds: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            token,
            allowed_guilds,
            client,
            inbound_tx: Mutex::new(None),
        }
    }

    /// Handle one webhook body. Returns the JSON the HTTP layer must
    /// answer with (pings are answered with pong; commands are
    /// acknowledged while the turn runs out-of-band).
    pub async fn handle_webhook(&self, body: &[u8]) -> Result<serde_json::Value, ChannelError> {
        let interaction: Interaction = serde_json::from_slice(body)
            .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;

        match interaction.r#type {
            INTERACTION_PING => Ok(serde_json::json!({"type": 1})),
            INTERACTION_APPLICATION_COMMAND => {
                self.handle_command(interaction).await?;
                // Deferred channel message; the reply is posted to the
                // channel when the turn completes.
                Ok(serde_json::json!({"type": 5}))
            }
            other => {
                warn!(interaction_type = other, "ignoring unsupported discord interaction");
                Ok(serde_json::json!({"type": 1}))
            }
        }
    }

    async fn handle_command(&self, interaction: Interaction) -> Result<(), ChannelError> {
        if !self.is_allowed(&interaction.guild_id) {
            warn!(guild_id = %interaction.guild_id, "unauthorized discord guild");
            return Err(ChannelError::Unauthorized {
                channel: "discord".into(),
                sender_id: interaction.guild_id,
            });
        }

        let user = interaction.member.user;
        let mut content = format!("/{}", interaction.data.name);
        // Slash-command options append as plain words so the model sees
        // the full invocation.
        for option in interaction.data.options {
            if let Some(value) = option.value.as_str() {
                content.push(' ');
                content.push_str(value);
            }
        }

        info!(user_id = %user.id, command = %content, "discord command received");

        let inbound = InboundMessage {
            channel: "discord".into(),
            sender_id: user.id,
            sender_name: user.username,
            content,
            chat_id: interaction.channel_id,
        };

        let guard = self.inbound_tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("discord channel not started".into()))?;
        tx.send(inbound)
            .await
            .map_err(|_| ChannelError::ConnectionLost("inbound queue closed".into()))
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    fn max_message_len(&self) -> usize {
        MESSAGE_CAP
    }

    async fn start(&self) -> Result<mpsc::Receiver<InboundMessage>, ChannelError> {
        info!("discord channel ready (webhook mode)");
        let (tx, rx) = mpsc::channel(64);
        *self.inbound_tx.lock().await = Some(tx);
        Ok(rx)
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "content": truncate_reply(text, MESSAGE_CAP),
        });

        let response = self
            .client
            .post(format!("{API_URL}/channels/{chat_id}/messages"))
            .header("Authorization", format!("Bot {}", self.token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: "discord".into(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            return Err(ChannelError::DeliveryFailed {
                channel: "discord".into(),
                reason: format!("status {status}: {detail}"),
            });
        }
        Ok(())
    }

    /// Authorization on Discord is per-guild; sender_id here is the guild.
    fn is_allowed(&self, sender_id: &str) -> bool {
        !self.allowed_guilds.is_empty() && self.allowed_guilds.iter().any(|g| g == sender_id)
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("discord channel stopping");
        *self.inbound_tx.lock().await = None;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        Ok(!self.token.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct Interaction {
    r#type: u64,
    #[serde(default)]
    data: InteractionData,
    #[serde(default)]
    member: InteractionMember,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    guild_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct InteractionData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    options: Vec<InteractionOption>,
}

#[derive(Debug, Deserialize)]
struct InteractionOption {
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct InteractionMember {
    #[serde(default)]
    user: InteractionUser,
}

#[derive(Debug, Default, Deserialize)]
struct InteractionUser {
    #[serde(default)]
    id: String,
    #[serde(default)]
    username: String,
}
