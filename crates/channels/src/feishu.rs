//! Feishu channel adapter.
//!
//! Events arrive on the webhook endpoint. URL-verification requests echo
//! the challenge and never touch the engine. Encrypted payloads are
//! base64-decoded, then AES-128-CBC decrypted with key = the first 16
//! bytes of SHA-256(encrypt_key) and IV = the first 16 ciphertext bytes,
//! PKCS7-unpadded. Only `im.message.receive_v1` events produce inbound
//! messages. Outbound text goes through the IM API with a cached tenant
//! access token.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use relayclaw_core::channel::{truncate_reply, Channel, InboundMessage};
use relayclaw_core::error::ChannelError;

const MESSAGE_CAP: usize = 4096;
const API_URL: &str = "https://open.feishu.cn/open-apis";

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub struct FeishuChannel {
    app_id: String,
    app_secret: String,
    encrypt_key: String,
    allowed_users: Vec<String>,
    client: reqwest::Client,
    token: Mutex<CachedToken>,
    inbound_tx: Mutex<Option<mpsc::Sender<InboundMessage>>>,
}

#[derive(Default)]
struct CachedToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl FeishuChannel {
    pub fn new(
        app_id: String,
        app_secret: String,
        encrypt_key: String,
        allowed_users: Vec<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            app_id,
            app_secret,
            encrypt_key,
            allowed_users,
            client,
            token: Mutex::new(CachedToken::default()),
            inbound_tx: Mutex::new(None),
        }
    }

    /// Handle one webhook body and return the JSON to answer with.
    pub async fn handle_event(&self, body: &[u8]) -> Result<serde_json::Value, ChannelError> {
        let mut event: Event = serde_json::from_slice(body)
            .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;

        // Encrypted payloads replace the whole event once decrypted.
        if !event.encrypt.is_empty() {
            let plaintext = self.decrypt(&event.encrypt)?;
            event = serde_json::from_slice(&plaintext)
                .map_err(|e| ChannelError::InvalidPayload(format!("decrypted event: {e}")))?;
        }

        // URL verification: echo the challenge, no downstream call.
        if event.r#type == "url_verification" || !event.challenge.is_empty() {
            return Ok(serde_json::json!({"challenge": event.challenge}));
        }

        // The event type lives in the 2.0 header; older payloads carry it
        // in the event body itself.
        let event_type = event
            .header
            .as_ref()
            .map(|h| h.event_type.clone())
            .filter(|t| !t.is_empty())
            .or_else(|| {
                event
                    .event
                    .as_ref()
                    .and_then(|e| e["type"].as_str().map(String::from))
            })
            .unwrap_or_default();

        if event_type == "im.message.receive_v1" {
            if let Err(e) = self.handle_message_event(&event).await {
                warn!(error = %e, "failed to handle feishu message event");
            }
        }

        Ok(serde_json::json!({"status": "ok"}))
    }

    async fn handle_message_event(&self, event: &Event) -> Result<(), ChannelError> {
        let payload: MessageEvent = event
            .event
            .as_ref()
            .map(|body| serde_json::from_value(body.clone()))
            .transpose()
            .map_err(|e| ChannelError::InvalidPayload(format!("message event: {e}")))?
            .ok_or_else(|| ChannelError::InvalidPayload("missing event body".into()))?;

        let sender_id = payload.sender.sender_id.open_id.clone();
        let content = parse_message_content(
            &payload.message.content,
            &payload.message.message_type,
        );

        if !self.is_allowed(&sender_id) {
            warn!(user_id = %sender_id, "unauthorized feishu sender");
            let _ = self.send(&sender_id, "⛔ unauthorized user").await;
            return Ok(());
        }

        let inbound = InboundMessage {
            channel: "feishu".into(),
            sender_id: sender_id.clone(),
            sender_name: payload.sender.sender_id.user_id.clone(),
            content,
            // Replies address the sender's open_id directly.
            chat_id: sender_id,
        };

        let guard = self.inbound_tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("feishu channel not started".into()))?;
        tx.send(inbound)
            .await
            .map_err(|_| ChannelError::ConnectionLost("inbound queue closed".into()))
    }

    /// AES-128-CBC with key = SHA-256(encrypt_key)[..16], IV = first block.
    fn decrypt(&self, encrypted: &str) -> Result<Vec<u8>, ChannelError> {
        if self.encrypt_key.is_empty() {
            return Err(ChannelError::InvalidPayload(
                "encrypted event but no encrypt_key configured".into(),
            ));
        }

        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|e| ChannelError::InvalidPayload(format!("base64: {e}")))?;
        if ciphertext.len() < 32 || ciphertext.len() % 16 != 0 {
            return Err(ChannelError::InvalidPayload("ciphertext too short".into()));
        }

        let digest = Sha256::digest(self.encrypt_key.as_bytes());
        let key = &digest[..16];
        let (iv, data) = ciphertext.split_at(16);

        let mut buf = data.to_vec();
        let plaintext = Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|e| ChannelError::InvalidPayload(format!("cipher init: {e}")))?
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|e| ChannelError::InvalidPayload(format!("decrypt: {e}")))?;

        Ok(plaintext.to_vec())
    }

    /// Tenant access token, refreshed one minute before expiry.
    async fn access_token(&self) -> Result<String, ChannelError> {
        let mut cached = self.token.lock().await;
        if let Some(expires_at) = cached.expires_at {
            if Utc::now() < expires_at - ChronoDuration::seconds(60) && !cached.value.is_empty() {
                return Ok(cached.value.clone());
            }
        }

        let body = serde_json::json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret,
        });
        let response = self
            .client
            .post(format!("{API_URL}/auth/v3/tenant_access_token/internal"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;

        let result: TokenResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;
        if result.code != 0 {
            return Err(ChannelError::NotConfigured(format!(
                "feishu auth error: {}",
                result.msg
            )));
        }

        cached.value = result.tenant_access_token.clone();
        cached.expires_at = Some(Utc::now() + ChronoDuration::seconds(result.expire));
        Ok(result.tenant_access_token)
    }
}

#[async_trait]
impl Channel for FeishuChannel {
    fn name(&self) -> &str {
        "feishu"
    }

    fn max_message_len(&self) -> usize {
        MESSAGE_CAP
    }

    async fn start(&self) -> Result<mpsc::Receiver<InboundMessage>, ChannelError> {
        info!(app_id = %self.app_id, "feishu channel ready (webhook mode)");
        let (tx, rx) = mpsc::channel(64);
        *self.inbound_tx.lock().await = Some(tx);
        Ok(rx)
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let token = self.access_token().await?;

        let content = serde_json::json!({"text": truncate_reply(text, MESSAGE_CAP)});
        let body = serde_json::json!({
            "receive_id": chat_id,
            "content": content.to_string(),
            "msg_type": "text",
        });

        let response = self
            .client
            .post(format!("{API_URL}/im/v1/messages?receive_id_type=open_id"))
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: "feishu".into(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            return Err(ChannelError::DeliveryFailed {
                channel: "feishu".into(),
                reason: format!("status {status}: {detail}"),
            });
        }
        Ok(())
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        !self.allowed_users.is_empty() && self.allowed_users.iter().any(|u| u == sender_id)
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("feishu channel stopping");
        *self.inbound_tx.lock().await = None;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        Ok(!self.app_id.is_empty() && !self.app_secret.is_empty())
    }
}

/// Text messages carry `{"text": ...}` JSON in `content`; other message
/// kinds pass through raw.
fn parse_message_content(content: &str, message_type: &str) -> String {
    if message_type == "text" {
        if let Ok(parsed) = serde_json::from_str::<TextContent>(content) {
            return parsed.text;
        }
    }
    content.to_string()
}

// --- wire types ---

#[derive(Debug, Default, Deserialize)]
struct Event {
    #[serde(default)]
    r#type: String,
    #[serde(default)]
    challenge: String,
    #[serde(default)]
    encrypt: String,
    #[serde(default)]
    header: Option<EventHeader>,
    /// Raw event body; only parsed as a message event when the type says
    /// it is one.
    #[serde(default)]
    event: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EventHeader {
    #[serde(default)]
    event_type: String,
}

#[derive(Debug, Deserialize)]
struct MessageEvent {
    sender: Sender,
    message: FsMessage,
}

#[derive(Debug, Deserialize)]
struct Sender {
    sender_id: SenderId,
}

#[derive(Debug, Default, Deserialize)]
struct SenderId {
    #[serde(default)]
    open_id: String,
    #[serde(default)]
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct FsMessage {
    #[serde(default)]
    message_type: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    text: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    #[serde(default)]
    expire: i64,
}
