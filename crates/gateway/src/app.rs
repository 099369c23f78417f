//! Application wiring and the dispatch loop.
//!
//! One inbound message = one spawned task: route to the agent, run the
//! turn, deliver the reply on the same channel and chat. Channel-level
//! authenticity and authorization have already happened inside the
//! adapters; errors here are turned into short user-facing messages.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use relayclaw_agent::{AgentEngine, AgentRouter};
use relayclaw_channels::{DiscordChannel, FeishuChannel, TelegramChannel};
use relayclaw_config::AppConfig;
use relayclaw_confirm::{ConfirmationGate, ConfirmationRequest, Notifier};
use relayclaw_core::agent::AgentDefinition;
use relayclaw_core::channel::Channel;
use relayclaw_core::error::Error;
use relayclaw_health::{MemoryGuard, MemoryGuardConfig};
use relayclaw_memory::MemoryStore;
use relayclaw_session::SessionStore;

/// DMs an administrator over a channel when a confirmation is pending,
/// and announces the outcome. The admin is the first allow-listed sender
/// of the channel.
struct ChannelNotifier {
    channel: Arc<dyn Channel>,
    admin_chat_id: String,
}

#[async_trait::async_trait]
impl Notifier for ChannelNotifier {
    fn name(&self) -> &str {
        self.channel.name()
    }

    async fn send_confirmation(&self, request: &ConfirmationRequest) {
        let text = format!(
            "⚠️ Confirmation required ({risk} risk)\n\
             Operation: {operation}\n\
             {details}\n\
             id: {id} — approve or reject via POST /confirmations/{id}/approve|reject",
            risk = request.risk_level,
            operation = request.operation,
            details = request.details,
            id = request.id,
        );
        if let Err(e) = self.channel.send(&self.admin_chat_id, &text).await {
            warn!(channel = self.channel.name(), error = %e, "failed to deliver confirmation request");
        }
    }

    async fn notify_result(&self, request: &ConfirmationRequest, approved: bool) {
        let verdict = if approved { "approved" } else { "rejected" };
        let text = format!("Operation {verdict}: {}", request.operation);
        if let Err(e) = self.channel.send(&self.admin_chat_id, &text).await {
            warn!(channel = self.channel.name(), error = %e, "failed to deliver confirmation result");
        }
    }
}

pub struct App {
    pub config: AppConfig,
    pub sessions: Arc<SessionStore>,
    pub memory: Arc<MemoryStore>,
    pub gate: Arc<ConfirmationGate>,
    pub router: Arc<AgentRouter>,
    pub guard: Arc<MemoryGuard>,
    channels: Vec<Arc<dyn Channel>>,
    pub feishu: Option<Arc<FeishuChannel>>,
    pub discord: Option<Arc<DiscordChannel>>,
    shutdown: watch::Sender<bool>,
}

impl App {
    /// Wire every subsystem from the loaded configuration. Fatal on any
    /// configuration error.
    pub fn build(config: AppConfig) -> Result<Arc<Self>, Error> {
        let sessions = SessionStore::new(
            config.session.max_messages,
            config.session.idle_timeout_s,
            config.session.max_sessions,
        );

        let memory = Arc::new(
            MemoryStore::new(
                config.memory.enabled,
                &config.memory.memory_dir,
                config.memory.max_file_size,
            )
            .map_err(Error::Memory)?,
        );

        let gate = ConfirmationGate::new(
            config.tools.unattended_mode,
            config.tools.always_allow_dangerous.clone(),
        );

        let dispatcher = Arc::new(relayclaw_tools::build_dispatcher(
            &config.tools,
            memory.clone(),
            gate.clone(),
        )?);

        let provider = relayclaw_providers::build_provider(&config.llm);

        // Agents from config; an empty map still gets a default agent.
        let mut router = AgentRouter::new();
        let mut agent_configs: Vec<(String, relayclaw_config::AgentConfig)> = config
            .agents
            .iter()
            .map(|(id, cfg)| (id.clone(), cfg.clone()))
            .collect();
        agent_configs.sort_by(|a, b| {
            // "default" first, then stable by id, so the default agent is
            // deterministic.
            (a.0 != "default", &a.0).cmp(&(b.0 != "default", &b.0))
        });
        if agent_configs.is_empty() {
            agent_configs.push((
                "default".into(),
                relayclaw_config::AgentConfig {
                    name: "Assistant".into(),
                    system_prompt: "You are a helpful assistant.".into(),
                    tools: None,
                },
            ));
        }

        for (id, agent_config) in agent_configs {
            let definition = AgentDefinition {
                id: id.clone(),
                name: agent_config.name,
                system_prompt: agent_config.system_prompt,
                tools: agent_config.tools,
            };
            router.register(Arc::new(AgentEngine::new(
                definition,
                provider.clone(),
                sessions.clone(),
                dispatcher.clone(),
                memory.clone(),
            )));
        }
        let router = Arc::new(router);

        // Channel adapters, enabled ones only. The first allow-listed
        // telegram user doubles as the confirmation administrator.
        let mut channels: Vec<Arc<dyn Channel>> = Vec::new();
        if config.channels.telegram.enabled {
            let telegram: Arc<dyn Channel> = Arc::new(TelegramChannel::new(
                config.channels.telegram.token.clone(),
                config.channels.telegram.allowed_users.clone(),
            ));
            if let Some(admin) = config.channels.telegram.allowed_users.first() {
                gate.register_notifier(Arc::new(ChannelNotifier {
                    channel: telegram.clone(),
                    admin_chat_id: admin.to_string(),
                }));
            }
            channels.push(telegram);
        }
        let discord = if config.channels.discord.enabled {
            let ch = Arc::new(DiscordChannel::new(
                config.channels.discord.token.clone(),
                config.channels.discord.allowed_guilds.clone(),
            ));
            channels.push(ch.clone());
            Some(ch)
        } else {
            None
        };
        let feishu = if config.channels.feishu.enabled {
            let ch = Arc::new(FeishuChannel::new(
                config.channels.feishu.app_id.clone(),
                config.channels.feishu.app_secret.clone(),
                config.channels.feishu.encrypt_key.clone(),
                config.channels.feishu.allowed_users.clone(),
            ));
            if let Some(admin) = config.channels.feishu.allowed_users.first() {
                gate.register_notifier(Arc::new(ChannelNotifier {
                    channel: ch.clone() as Arc<dyn Channel>,
                    admin_chat_id: admin.clone(),
                }));
            }
            channels.push(ch.clone());
            Some(ch)
        } else {
            None
        };

        let (shutdown, _) = watch::channel(false);

        // Memory guard: reclamation prunes idle sessions; critical
        // pressure triggers the same graceful shutdown as a signal.
        let guard = {
            let reclaim_sessions = sessions.clone();
            let emergency_sessions = sessions.clone();
            let critical_shutdown = shutdown.clone();
            MemoryGuard::new(
                MemoryGuardConfig::default(),
                Box::new(move || {
                    reclaim_sessions.cleanup();
                }),
                Box::new(move || {
                    emergency_sessions.cleanup();
                }),
                Box::new(move || {
                    let _ = critical_shutdown.send(true);
                }),
            )
        };

        Ok(Arc::new(Self {
            config,
            sessions,
            memory,
            gate,
            router,
            guard,
            channels,
            feishu,
            discord,
            shutdown,
        }))
    }

    /// Subscribe to the shutdown signal.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Start background tasks, channels, and the HTTP server; return when
    /// shutdown has been requested and the channels are stopped.
    pub async fn run(self: &Arc<Self>) -> Result<(), Error> {
        info!(
            agents = self.router.agent_ids().len(),
            channels = self.channels.len(),
            port = self.config.server.port,
            "gateway starting"
        );

        self.sessions.spawn_cleanup();
        self.guard.spawn();

        // HTTP server (health, webhooks, confirmations).
        let server_state = crate::server::ServerState::from_app(self);
        let http_router = crate::server::build_router(server_state);
        let addr = format!("0.0.0.0:{}", self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config {
                message: format!("failed to bind {addr}: {e}"),
            })?;
        info!(addr = %addr, "http server listening");

        let mut server_shutdown = self.shutdown_signal();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = server_shutdown.changed().await;
            };
            if let Err(e) = axum::serve(listener, http_router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "http server failed");
            }
        });

        // Channels: each gets a consumer task feeding the dispatch path.
        for channel in &self.channels {
            match channel.start().await {
                Ok(mut rx) => {
                    let app = Arc::clone(self);
                    let name = channel.name().to_string();
                    let channel = channel.clone();
                    info!(channel = %name, "channel started");
                    tokio::spawn(async move {
                        while let Some(inbound) = rx.recv().await {
                            let app = Arc::clone(&app);
                            let channel = channel.clone();
                            tokio::spawn(async move {
                                app.dispatch(channel, inbound).await;
                            });
                        }
                    });
                }
                Err(e) => {
                    // A channel that cannot start is logged, not fatal;
                    // the rest of the gateway still serves.
                    error!(channel = channel.name(), error = %e, "failed to start channel");
                }
            }
        }

        // Block until shutdown is requested.
        let mut shutdown = self.shutdown_signal();
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("gateway stopping");
        for channel in &self.channels {
            if let Err(e) = channel.stop().await {
                warn!(channel = channel.name(), error = %e, "failed to stop channel");
            }
        }
        Ok(())
    }

    /// One inbound message: route, process, deliver.
    async fn dispatch(
        &self,
        channel: Arc<dyn Channel>,
        inbound: relayclaw_core::channel::InboundMessage,
    ) {
        info!(
            channel = %inbound.channel,
            sender_id = %inbound.sender_id,
            "message received"
        );

        let result = self
            .router
            .process(None, &inbound.channel, &inbound.sender_id, &inbound.content)
            .await;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                error!(channel = %inbound.channel, error = %e, "turn failed");
                user_facing_error(&e)
            }
        };

        if reply.is_empty() {
            return;
        }
        if let Err(e) = channel.send(&inbound.chat_id, &reply).await {
            error!(channel = %inbound.channel, error = %e, "failed to deliver reply");
        }
    }
}

/// What the user sees when a turn fails. Tool and sandbox failures never
/// reach here (the engine feeds them back to the model); provider
/// exhaustion gets a short apology, everything else a generic error.
pub fn user_facing_error(error: &Error) -> String {
    match error {
        Error::Provider(_) => {
            "Sorry, I couldn't reach the language model. Please try again in a moment.".into()
        }
        _ => "Sorry, something went wrong while handling your message.".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayclaw_core::error::ProviderError;

    fn test_config() -> AppConfig {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.tools.work_dir = tmp.path().join("work").to_string_lossy().into_owned();
        // Leak the tempdir so the work dir outlives the test config.
        std::mem::forget(tmp);
        config
    }

    #[tokio::test]
    async fn build_wires_default_agent() {
        let app = App::build(test_config()).unwrap();
        assert_eq!(app.router.agent_ids(), vec!["default"]);
        assert!(app.feishu.is_none());
        assert!(app.discord.is_none());
    }

    #[tokio::test]
    async fn build_registers_configured_agents() {
        let mut config = test_config();
        config.agents.insert(
            "ops".into(),
            relayclaw_config::AgentConfig {
                name: "Ops".into(),
                system_prompt: "ops prompt".into(),
                tools: Some(vec!["read_file".into()]),
            },
        );
        config.agents.insert(
            "default".into(),
            relayclaw_config::AgentConfig {
                name: "Main".into(),
                system_prompt: "main".into(),
                tools: None,
            },
        );

        let app = App::build(config).unwrap();
        let mut ids = app.router.agent_ids();
        ids.sort();
        assert_eq!(ids, vec!["default", "ops"]);
        // "default" wins the default slot regardless of map order.
        assert!(app.router.route(None).is_ok());
    }

    #[tokio::test]
    async fn enabled_channels_are_constructed() {
        let mut config = test_config();
        config.channels.feishu.enabled = true;
        config.channels.feishu.app_id = "app".into();
        config.channels.feishu.app_secret = "secret".into();
        config.channels.discord.enabled = true;
        config.channels.discord.token = "tok".into();

        let app = App::build(config).unwrap();
        assert!(app.feishu.is_some());
        assert!(app.discord.is_some());
    }

    #[tokio::test]
    async fn shutdown_signal_roundtrip() {
        let app = App::build(test_config()).unwrap();
        let mut rx = app.shutdown_signal();
        assert!(!*rx.borrow());
        app.shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[test]
    fn provider_errors_get_apology() {
        let msg = user_facing_error(&Error::Provider(ProviderError::Unavailable("x".into())));
        assert!(msg.contains("couldn't reach"));

        let msg = user_facing_error(&Error::Internal("panic".into()));
        assert!(msg.contains("something went wrong"));
    }
}
