//! HTTP surface: health check, channel webhooks, and confirmation
//! endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use relayclaw_channels::{DiscordChannel, FeishuChannel};
use relayclaw_confirm::ConfirmationGate;
use relayclaw_health::MemoryGuard;
use relayclaw_session::SessionStore;

use crate::app::App;

#[derive(Clone)]
pub struct ServerState {
    pub sessions: Arc<SessionStore>,
    pub gate: Arc<ConfirmationGate>,
    pub guard: Arc<MemoryGuard>,
    pub health_enabled: bool,
    pub feishu: Option<Arc<FeishuChannel>>,
    pub discord: Option<Arc<DiscordChannel>>,
}

impl ServerState {
    pub fn from_app(app: &Arc<App>) -> Self {
        Self {
            sessions: app.sessions.clone(),
            gate: app.gate.clone(),
            guard: app.guard.clone(),
            health_enabled: app.config.server.health_check_enabled,
            feishu: app.feishu.clone(),
            discord: app.discord.clone(),
        }
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhook/feishu", post(feishu_webhook_handler))
        .route("/webhook/discord", post(discord_webhook_handler))
        .route("/confirmations", get(pending_confirmations_handler))
        .route("/confirmations/{id}/approve", post(approve_handler))
        .route("/confirmations/{id}/reject", post(reject_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(
    State(state): State<ServerState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !state.health_enabled {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.stats(),
        "memory_guard": state.guard.stats(),
    })))
}

async fn feishu_webhook_handler(
    State(state): State<ServerState>,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let Some(feishu) = state.feishu else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    match feishu.handle_event(&body).await {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            warn!(error = %e, "feishu webhook rejected");
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

async fn discord_webhook_handler(
    State(state): State<ServerState>,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let Some(discord) = state.discord else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    match discord.handle_webhook(&body).await {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            warn!(error = %e, "discord webhook rejected");
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

async fn pending_confirmations_handler(
    State(state): State<ServerState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "pending": state.gate.pending() }))
}

#[derive(Debug, Default, Deserialize)]
struct DecisionBody {
    #[serde(default)]
    approver: String,
}

async fn approve_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    body: Option<Json<DecisionBody>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    decide(&state.gate, &id, body, true)
}

async fn reject_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    body: Option<Json<DecisionBody>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    decide(&state.gate, &id, body, false)
}

fn decide(
    gate: &ConfirmationGate,
    id: &str,
    body: Option<Json<DecisionBody>>,
    approve: bool,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let approver = body
        .map(|Json(b)| b.approver)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "web".into());

    let result = if approve {
        gate.approve(id, &approver)
    } else {
        gate.reject(id, &approver)
    };

    match result {
        Ok(()) => Ok(Json(serde_json::json!({"status": "ok"}))),
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayclaw_core::tool::RiskLevel;
    use relayclaw_health::MemoryGuardConfig;

    fn test_state(health_enabled: bool) -> ServerState {
        ServerState {
            sessions: SessionStore::new(10, 3600, 10),
            gate: ConfirmationGate::new(false, vec![]),
            guard: MemoryGuard::new(
                MemoryGuardConfig::default(),
                Box::new(|| {}),
                Box::new(|| {}),
                Box::new(|| {}),
            ),
            health_enabled,
            feishu: None,
            discord: None,
        }
    }

    #[tokio::test]
    async fn health_reports_session_stats() {
        let state = test_state(true);
        state.sessions.get_or_create("telegram", "42", "default");

        let Json(body) = health_handler(State(state)).await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"]["total_sessions"], 1);
        assert!(body["memory_guard"]["resident_bytes"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn health_disabled_is_404() {
        let err = health_handler(State(test_state(false))).await.unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn feishu_webhook_unconfigured_is_503() {
        let err = feishu_webhook_handler(State(test_state(true)), axum::body::Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn feishu_challenge_roundtrips_through_handler() {
        let mut state = test_state(true);
        state.feishu = Some(Arc::new(FeishuChannel::new(
            "app".into(),
            "secret".into(),
            String::new(),
            vec![],
        )));

        let body = axum::body::Bytes::from_static(
            br#"{"type":"url_verification","challenge":"abc123"}"#,
        );
        let Json(reply) = feishu_webhook_handler(State(state), body).await.unwrap();
        assert_eq!(reply["challenge"], "abc123");
    }

    #[tokio::test]
    async fn discord_ping_roundtrips_through_handler() {
        let mut state = test_state(true);
        state.discord = Some(Arc::new(DiscordChannel::new("tok".into(), vec![])));

        let body = axum::body::Bytes::from_static(br#"{"type":1}"#);
        let Json(reply) = discord_webhook_handler(State(state), body).await.unwrap();
        assert_eq!(reply["type"], 1);
    }

    #[tokio::test]
    async fn approve_endpoint_resolves_waiter() {
        let state = test_state(true);
        let gate = state.gate.clone();

        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move {
                gate.request("command", "rm -rf /tmp/x", "", RiskLevel::High)
                    .await
            }
        });

        let id = loop {
            if let Some(req) = gate.pending().first() {
                break req.id.clone();
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        };

        let Json(reply) = approve_handler(
            State(state),
            Path(id),
            Some(Json(DecisionBody {
                approver: "admin".into(),
            })),
        )
        .await
        .unwrap();
        assert_eq!(reply["status"], "ok");
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn unknown_confirmation_is_404() {
        let err = approve_handler(State(test_state(true)), Path("conf_nope".into()), None)
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);

        let err = reject_handler(State(test_state(true)), Path("conf_nope".into()), None)
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pending_list_shape() {
        let Json(body) = pending_confirmations_handler(State(test_state(true))).await;
        assert!(body["pending"].as_array().unwrap().is_empty());
    }
}
