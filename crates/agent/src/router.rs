//! Agent router — maps a turn to an agent and supervises it.
//!
//! Lookup: an explicit agent id wins (unknown ids error); otherwise the
//! default agent (the first registered). Every turn runs inside a
//! supervising task so a panicking agent produces an `internal` error,
//! not a process exit.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use relayclaw_core::error::Error;
use relayclaw_core::provider::ChunkSink;

use crate::engine::AgentEngine;

#[derive(Default)]
pub struct AgentRouter {
    engines: HashMap<String, Arc<AgentEngine>>,
    default_agent: Option<String>,
}

impl AgentRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. The first registration becomes the default.
    pub fn register(&mut self, engine: Arc<AgentEngine>) {
        let id = engine.agent_id().to_string();
        info!(agent = %id, "agent registered");
        if self.default_agent.is_none() {
            self.default_agent = Some(id.clone());
        }
        self.engines.insert(id, engine);
    }

    pub fn agent_ids(&self) -> Vec<&str> {
        self.engines.keys().map(|s| s.as_str()).collect()
    }

    /// Resolve a turn to an agent.
    pub fn route(&self, agent_id: Option<&str>) -> Result<Arc<AgentEngine>, Error> {
        match agent_id.filter(|id| !id.is_empty()) {
            Some(id) => self.engines.get(id).cloned().ok_or_else(|| Error::Config {
                message: format!("agent not found: {id}"),
            }),
            None => self
                .default_agent
                .as_ref()
                .and_then(|id| self.engines.get(id))
                .cloned()
                .ok_or_else(|| Error::Config {
                    message: "no agent available".into(),
                }),
        }
    }

    /// Run one turn under panic supervision.
    pub async fn process(
        &self,
        agent_id: Option<&str>,
        channel: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<String, Error> {
        let engine = self.route(agent_id)?;
        let (channel, sender_id, content) =
            (channel.to_string(), sender_id.to_string(), content.to_string());

        let handle = tokio::spawn(async move {
            engine.process(&channel, &sender_id, &content).await
        });

        supervise(handle).await
    }

    /// Stream variant of [`process`](Self::process).
    pub async fn process_stream(
        &self,
        agent_id: Option<&str>,
        channel: &str,
        sender_id: &str,
        content: &str,
        on_chunk: ChunkSink,
    ) -> Result<String, Error> {
        let engine = self.route(agent_id)?;
        let (channel, sender_id, content) =
            (channel.to_string(), sender_id.to_string(), content.to_string());

        let handle = tokio::spawn(async move {
            engine
                .process_stream(&channel, &sender_id, &content, on_chunk)
                .await
        });

        supervise(handle).await
    }
}

async fn supervise(
    handle: tokio::task::JoinHandle<Result<String, Error>>,
) -> Result<String, Error> {
    match handle.await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            error!(error = %join_err, "agent panicked, turn aborted");
            Err(Error::Internal("agent panicked during turn".into()))
        }
        Err(join_err) => Err(Error::Internal(format!("turn cancelled: {join_err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relayclaw_confirm::ConfirmationGate;
    use relayclaw_core::agent::AgentDefinition;
    use relayclaw_core::error::ProviderError;
    use relayclaw_core::provider::{ChatRequest, ChatResponse, Provider};
    use relayclaw_memory::MemoryStore;
    use relayclaw_session::SessionStore;
    use relayclaw_tools::Dispatcher;

    struct FixedProvider {
        reply: String,
        panic: bool,
    }

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }
        fn model(&self) -> &str {
            "fixed-1"
        }
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            if self.panic {
                panic!("provider blew up");
            }
            Ok(ChatResponse::text(&self.reply))
        }
    }

    fn engine(id: &str, reply: &str, panics: bool) -> Arc<AgentEngine> {
        let agent = AgentDefinition {
            id: id.into(),
            name: id.into(),
            system_prompt: String::new(),
            tools: None,
        };
        Arc::new(AgentEngine::new(
            agent,
            Arc::new(FixedProvider {
                reply: reply.into(),
                panic: panics,
            }),
            SessionStore::new(10, 3600, 10),
            Arc::new(Dispatcher::new(
                Default::default(),
                std::time::Duration::from_secs(1),
                false,
                ConfirmationGate::new(true, vec![]),
            )),
            Arc::new(MemoryStore::new(false, "", 1024).unwrap()),
        ))
    }

    #[tokio::test]
    async fn default_agent_is_first_registered() {
        let mut router = AgentRouter::new();
        router.register(engine("first", "from first", false));
        router.register(engine("second", "from second", false));

        let reply = router.process(None, "cli", "u", "hi").await.unwrap();
        assert_eq!(reply, "from first");
    }

    #[tokio::test]
    async fn explicit_agent_selected() {
        let mut router = AgentRouter::new();
        router.register(engine("first", "from first", false));
        router.register(engine("second", "from second", false));

        let reply = router
            .process(Some("second"), "cli", "u", "hi")
            .await
            .unwrap();
        assert_eq!(reply, "from second");
    }

    #[tokio::test]
    async fn unknown_agent_errors() {
        let mut router = AgentRouter::new();
        router.register(engine("only", "x", false));

        let err = router
            .process(Some("missing"), "cli", "u", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn empty_router_errors() {
        let router = AgentRouter::new();
        let err = router.process(None, "cli", "u", "hi").await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn empty_hint_uses_default() {
        let mut router = AgentRouter::new();
        router.register(engine("first", "default reply", false));
        let reply = router.process(Some(""), "cli", "u", "hi").await.unwrap();
        assert_eq!(reply, "default reply");
    }

    #[tokio::test]
    async fn panicking_agent_becomes_internal_error() {
        let mut router = AgentRouter::new();
        router.register(engine("boom", "unused", true));

        let err = router.process(None, "cli", "u", "hi").await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
