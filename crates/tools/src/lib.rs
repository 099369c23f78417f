//! Built-in tools and the dispatcher that executes them.
//!
//! The dispatcher owns the registry, filters definitions by configuration
//! and per-agent subsets, enforces the per-call timeout, and defers
//! dangerous operations to the confirmation gate before they run.

mod apis;
mod dispatcher;
mod fs;
mod memory_notes;
mod shell;
mod system;
mod terminal;
mod web;

pub use dispatcher::Dispatcher;
pub use terminal::TerminalTool;

use std::sync::Arc;

use relayclaw_confirm::ConfirmationGate;
use relayclaw_config::ToolsConfig;
use relayclaw_core::error::Error;
use relayclaw_memory::MemoryStore;
use relayclaw_security::{CommandPolicy, Sandbox};

/// Build the dispatcher with every built-in tool the configuration
/// enables. Duplicate tool names are a fatal configuration error.
pub fn build_dispatcher(
    config: &ToolsConfig,
    memory: Arc<MemoryStore>,
    gate: Arc<ConfirmationGate>,
) -> Result<Dispatcher, Error> {
    let sandbox = Sandbox::new(&config.work_dir).map_err(|e| Error::Config {
        message: format!("failed to create work directory {}: {e}", config.work_dir),
    })?;
    let policy = CommandPolicy::new(config.blocked_commands.clone());
    let timeout = std::time::Duration::from_secs(config.timeout_s);

    let mut dispatcher = Dispatcher::new(
        config.enabled_tools.clone(),
        timeout,
        config.confirm_dangerous,
        gate,
    );

    dispatcher.register(Arc::new(fs::ReadFileTool::new(sandbox.clone())))?;
    dispatcher.register(Arc::new(fs::WriteFileTool::new(sandbox.clone())))?;
    dispatcher.register(Arc::new(fs::ListDirectoryTool::new(sandbox.clone())))?;
    dispatcher.register(Arc::new(fs::ApplyPatchTool::new(sandbox.clone())))?;
    dispatcher.register(Arc::new(fs::GrepTool::new(sandbox.clone())))?;
    dispatcher.register(Arc::new(shell::ExecuteCommandTool::new(
        sandbox.clone(),
        policy.clone(),
        timeout,
    )))?;
    dispatcher.register(Arc::new(system::GetSystemInfoTool::new(
        config.work_dir.clone(),
    )))?;

    if config.web_search_enabled {
        dispatcher.register(Arc::new(web::WebSearchTool::new()))?;
        dispatcher.register(Arc::new(web::HttpRequestTool::new()))?;
    }

    dispatcher.register(Arc::new(apis::WeatherTool::new()))?;
    dispatcher.register(Arc::new(apis::IpInfoTool::new()))?;
    dispatcher.register(Arc::new(apis::ExchangeRateTool::new()))?;
    for api in &config.custom_apis {
        if api.enabled {
            dispatcher.register(Arc::new(apis::CustomApiTool::new(api.clone())))?;
        }
    }

    dispatcher.register(Arc::new(memory_notes::MemoryReadTool::new(memory.clone())))?;
    dispatcher.register(Arc::new(memory_notes::MemoryWriteTool::new(memory)))?;

    if config.terminal_enabled {
        dispatcher.register(Arc::new(TerminalTool::new(sandbox, policy, timeout)))?;
    }

    Ok(dispatcher)
}
