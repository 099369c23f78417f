//! The gateway: builds every subsystem from configuration, runs the
//! channel dispatch loop, and serves the HTTP surface (health, webhooks,
//! confirmation endpoints).

mod app;
mod server;

pub use app::App;
pub use server::{build_router, ServerState};
