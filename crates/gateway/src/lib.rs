//! The relay gateway: MCP over WebSocket on one port, webhook ingestion and
//! tool management HTTP on another, health and metrics on both.

pub mod auth;
pub mod dispatch;
pub mod handler;
pub mod health_routes;
pub mod server;
pub mod state;
pub mod tools_routes;
pub mod webhook_routes;
pub mod ws;

pub use {
    server::{http_router, run, ws_router},
    state::AppState,
};
