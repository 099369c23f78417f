//! The agent engine — one inbound message becomes one turn.
//!
//! A turn: append the user message, compose the system prompt, snapshot
//! the session, call the provider, execute any requested tools in order,
//! and call again (without tool definitions) until the model produces
//! text. The session mutex is never held across an LLM call or a tool
//! execution; the engine snapshots, then appends.

use std::sync::Arc;
use tracing::{debug, info, warn};

use relayclaw_core::agent::AgentDefinition;
use relayclaw_core::error::Error;
use relayclaw_core::message::Message;
use relayclaw_core::provider::{ChatRequest, ChatResponse, ChunkSink, Provider};
use relayclaw_memory::MemoryStore;
use relayclaw_session::SessionStore;
use relayclaw_tools::Dispatcher;

pub struct AgentEngine {
    agent: AgentDefinition,
    provider: Arc<dyn Provider>,
    sessions: Arc<SessionStore>,
    tools: Arc<Dispatcher>,
    memory: Arc<MemoryStore>,
    /// Bound on tool-execution rounds per turn. After each round the next
    /// request omits tool definitions, forcing the model to synthesize.
    max_tool_rounds: u32,
}

impl AgentEngine {
    pub fn new(
        agent: AgentDefinition,
        provider: Arc<dyn Provider>,
        sessions: Arc<SessionStore>,
        tools: Arc<Dispatcher>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        Self {
            agent,
            provider,
            sessions,
            tools,
            memory,
            max_tool_rounds: 1,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent.id
    }

    /// Process one turn and return the reply text.
    pub async fn process(
        &self,
        channel: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<String, Error> {
        self.run_turn(channel, sender_id, content, None).await
    }

    /// Stream variant: content fragments of each completion are delivered
    /// to `on_chunk` as they arrive.
    pub async fn process_stream(
        &self,
        channel: &str,
        sender_id: &str,
        content: &str,
        on_chunk: ChunkSink,
    ) -> Result<String, Error> {
        self.run_turn(channel, sender_id, content, Some(on_chunk)).await
    }

    async fn run_turn(
        &self,
        channel: &str,
        sender_id: &str,
        content: &str,
        on_chunk: Option<ChunkSink>,
    ) -> Result<String, Error> {
        let session = self.sessions.get_or_create(channel, sender_id, &self.agent.id);
        self.sessions.append(&session, Message::user(content));

        info!(
            agent = %self.agent.id,
            channel,
            sender_id,
            "processing turn"
        );

        let tool_defs = self
            .tools
            .definitions(self.agent.tools.as_deref());
        let system_prompt = self.compose_system_prompt(&tool_defs);

        let mut tool_rounds: u32 = 0;
        loop {
            // Fresh snapshot each round; the system message is prepended
            // but never stored in the session.
            let mut messages = vec![Message::system(&system_prompt)];
            messages.extend(self.sessions.messages(&session));

            // Tool definitions only on the first round: after tools have
            // run, the model is asked to synthesize from their results.
            let round_tools = if tool_rounds == 0 { tool_defs.clone() } else { vec![] };

            let mut request = ChatRequest::new(self.provider.model(), messages)
                .with_tools(round_tools);
            request.stream = on_chunk.is_some();

            let response = self.complete(request, on_chunk.clone()).await?;

            if !response.tool_calls.is_empty() && tool_rounds < self.max_tool_rounds {
                tool_rounds += 1;
                self.execute_tool_calls(&session, &response).await;
                continue;
            }

            let reply = response.content;
            self.sessions.append(&session, Message::assistant(&reply));
            return Ok(reply);
        }
    }

    async fn complete(
        &self,
        request: ChatRequest,
        on_chunk: Option<ChunkSink>,
    ) -> Result<ChatResponse, Error> {
        let response = match on_chunk {
            Some(sink) => self.provider.chat_stream(request, sink).await?,
            None => self.provider.chat(request).await?,
        };
        Ok(response)
    }

    /// Append the assistant's tool-call message, then run each call
    /// sequentially in emitted order, appending one tool message per call.
    /// A tool failure is fed back to the model, never propagated.
    async fn execute_tool_calls(
        &self,
        session: &Arc<relayclaw_session::Session>,
        response: &ChatResponse,
    ) {
        self.sessions.append(
            session,
            Message::assistant_with_tool_calls("", response.tool_calls.clone()),
        );

        for call in &response.tool_calls {
            debug!(tool = %call.name, id = %call.id, "executing model-requested tool call");

            let outcome = match serde_json::from_str::<serde_json::Value>(&call.arguments) {
                Ok(args) => match self.tools.execute(&call.name, args).await {
                    Ok(output) => output,
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "tool call failed");
                        format!("Error: {e}")
                    }
                },
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "unparseable tool arguments");
                    format!("Error: failed to parse tool arguments: {e}")
                }
            };

            self.sessions
                .append(session, Message::tool_result(&call.name, &outcome));
        }
    }

    /// System prompt = agent template + environment block + tool list +
    /// memory context + usage directive.
    fn compose_system_prompt(
        &self,
        tool_defs: &[relayclaw_core::provider::ToolDefinition],
    ) -> String {
        let mut prompt = self.agent.system_prompt.clone();

        prompt.push_str("\n\n## Environment\n\n");
        prompt.push_str(&environment_block());

        if !tool_defs.is_empty() {
            prompt.push_str("\n## Available Tools\n\n");
            prompt.push_str("You can use the following tools to help the user:\n");
            for def in tool_defs {
                prompt.push_str(&format!("- **{}**: {}\n", def.name, def.description));
            }
            prompt.push_str(
                "\nUse tools with correct arguments. If a tool call fails, explain the failure to the user.\n",
            );
        }

        if self.memory.is_enabled() {
            let context = self.memory.memory_context();
            if !context.is_empty() {
                prompt.push_str("\n## Memory Context\n\n");
                prompt.push_str(&context);
            }
        }

        prompt
    }
}

fn environment_block() -> String {
    use sysinfo::System;

    let now = chrono::Local::now();
    let mut sys = System::new();
    sys.refresh_memory();

    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    format!(
        "- Current time: {}\n- Timezone: {}\n- Platform: {} {}\n- CPUs: {}\n- Memory: {} MB total, {} MB available\n- Hostname: {}\n",
        now.format("%Y-%m-%d %H:%M:%S"),
        now.format("%:z"),
        std::env::consts::OS,
        std::env::consts::ARCH,
        cpus,
        sys.total_memory() / 1024 / 1024,
        sys.available_memory() / 1024 / 1024,
        System::host_name().unwrap_or_default(),
    )
}
